mod launcher;
mod tcp;

use std::sync::Arc;

pub use launcher::{LaunchGuard, Launcher};
pub use tcp::{TcpLink, TcpPool};

use crate::WorkerFailure;

/// The parameters broadcast to every worker at the start of a round.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub round: u64,
    pub step: u64,
    pub params: Arc<[f32]>,
}

/// A worker's answer to a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub samples: u64,
    pub loss: f32,
    pub grad: Vec<f32>,
}

/// Provides registered workers to a session.
#[allow(unused)]
#[trait_variant::make(WorkerPool: Send)]
pub trait WorkerPoolTemplate {
    type Link: WorkerLink + Send;

    /// Launches worker `worker_id` and waits until it registers.
    ///
    /// # Arguments
    /// * `worker_id` - The id of the worker, also selecting its data shard.
    ///
    /// # Returns
    /// A link to the registered worker or why it couldn't be started.
    async fn spawn(&mut self, worker_id: usize) -> Result<Self::Link, WorkerFailure>;

    /// Releases whatever the pool itself holds, links are released on their own.
    async fn shutdown(&mut self);
}

/// A connection to one registered worker.
#[allow(unused)]
#[trait_variant::make(WorkerLink: Send)]
pub trait WorkerLinkTemplate {
    /// Sends `snapshot` and waits for the worker's report for that same round.
    async fn exchange(&mut self, snapshot: &Snapshot) -> Result<Report, WorkerFailure>;

    /// Tells the worker to stop and waits for it to go away.
    async fn release(&mut self);
}
