pub mod builder;
pub mod error;
pub mod worker;

use log::info;
use tokio::net::{TcpStream, ToSocketAddrs};

pub use builder::{WorkerBuilder, WorkerSpec};
pub use error::{Result, WorkerErr};
pub use worker::Worker;

/// Connects to the head at `head_addr` and serves rounds until it disconnects.
///
/// # Arguments
/// * `head_addr` - The address the head is listening on.
/// * `worker_id` - The id this worker was launched with.
/// * `spec` - What the worker trains and on which data.
///
/// # Returns
/// `Ok(())` once the head sends a disconnect.
pub async fn join<A: ToSocketAddrs>(head_addr: A, worker_id: usize, spec: &WorkerSpec) -> Result<()> {
    let mut worker = WorkerBuilder::build(worker_id, spec)?;

    let stream = TcpStream::connect(head_addr).await?;
    stream.set_nodelay(true)?;
    info!(worker_id = worker_id, peer:% = stream.peer_addr()?; "connected to head");

    let (rx, tx) = stream.into_split();
    let (rx, tx) = comms::channel(rx, tx);
    worker.run(rx, tx).await
}
