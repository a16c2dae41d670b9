use std::{collections::BTreeMap, time::Duration};

use futures::future::join_all;
use log::{debug, info, warn};
use tokio::time::{self, Instant};

use crate::{
    OrchestratorError, WorkerFailure,
    cluster::{Report, Snapshot, WorkerLink, WorkerPool},
    configs::TrainingConfig,
    status::{SessionState, WorkerState, WorkerStatus},
};

/// A live cluster: the head's view of every worker plus the links to the registered ones.
///
/// Dropping a session releases its links without the disconnect handshake, `shutdown`
/// is the orderly way out.
pub struct ClusterSession<P: WorkerPool> {
    pool: P,
    links: BTreeMap<usize, P::Link>,
    statuses: Vec<WorkerStatus>,
    state: SessionState,
    closed: bool,
}

impl<P: WorkerPool> ClusterSession<P> {
    /// Starts every configured worker and waits for all of them to register.
    ///
    /// # Arguments
    /// * `pool` - Where workers come from.
    /// * `config` - The run's config.
    ///
    /// # Returns
    /// The session or a `ClusterStart` error once a worker used up its start attempts,
    /// in which case everything started so far is shut down.
    pub async fn start(pool: P, config: &TrainingConfig) -> Result<Self, OrchestratorError> {
        let worker_count = config.cluster.worker_count;
        let mut session = Self {
            pool,
            links: BTreeMap::new(),
            statuses: (0..worker_count).map(WorkerStatus::new).collect(),
            state: SessionState::Initializing,
            closed: false,
        };

        for worker_id in 0..worker_count {
            if let Err(e) = session
                .start_worker(worker_id, config.cluster.start_attempts)
                .await
            {
                session.shutdown().await;
                return Err(e);
            }
        }

        info!(workers = worker_count; "cluster started");
        Ok(session)
    }

    async fn start_worker(&mut self, worker_id: usize, attempts: u32) -> Result<(), OrchestratorError> {
        let mut last_failure = None;

        for attempt in 1..=attempts.max(1) {
            match self.pool.spawn(worker_id).await {
                Ok(link) => {
                    self.links.insert(worker_id, link);
                    self.statuses[worker_id].transition(WorkerState::Ready);
                    return Ok(());
                }
                Err(e) => {
                    warn!(worker_id = worker_id, attempt = attempt; "cannot start worker: {e}");
                    last_failure = Some(e);
                }
            }
        }

        self.statuses[worker_id].transition(WorkerState::Failed);
        let reason = last_failure.map(|e| e.to_string()).unwrap_or_default();

        Err(OrchestratorError::ClusterStart(format!(
            "worker {worker_id} did not start after {attempts} attempts: {reason}"
        )))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn statuses(&self) -> &[WorkerStatus] {
        &self.statuses
    }

    pub fn status(&self, worker_id: usize) -> Option<&WorkerStatus> {
        self.statuses.get(worker_id)
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// The configured amount of workers.
    pub fn worker_count(&self) -> usize {
        self.statuses.len()
    }

    /// The ids of the workers taking part in the next broadcast, ascending.
    pub fn active_ids(&self) -> Vec<usize> {
        self.statuses
            .iter()
            .filter(|status| status.is_active())
            .map(WorkerStatus::id)
            .collect()
    }

    /// Respawns every failed worker that still has retry budget left.
    ///
    /// # Arguments
    /// * `retry_budget` - How many respawns each worker is allowed.
    ///
    /// # Returns
    /// The ids of the workers that are back.
    pub async fn readmit(&mut self, retry_budget: u32) -> Vec<usize> {
        let candidates: Vec<_> = self
            .statuses
            .iter()
            .filter(|s| s.state() == WorkerState::Failed && s.respawns() < retry_budget)
            .map(WorkerStatus::id)
            .collect();

        let mut readmitted = Vec::with_capacity(candidates.len());

        for worker_id in candidates {
            let status = &mut self.statuses[worker_id];
            status.transition(WorkerState::Starting);
            let respawn = status.respawns();

            match self.pool.spawn(worker_id).await {
                Ok(link) => {
                    self.links.insert(worker_id, link);
                    self.statuses[worker_id].transition(WorkerState::Ready);
                    info!(worker_id = worker_id, respawn = respawn; "worker readmitted");
                    readmitted.push(worker_id);
                }
                Err(e) => {
                    warn!(worker_id = worker_id, respawn = respawn; "cannot respawn worker: {e}");
                    self.fail(worker_id, retry_budget);
                }
            }
        }

        readmitted
    }

    /// Sends `snapshot` to every active worker and waits for their reports up to `timeout`.
    ///
    /// Workers that fail, time out or answer with an update of the wrong size are marked
    /// `failed` and their links dropped.
    ///
    /// # Arguments
    /// * `snapshot` - The round's parameters.
    /// * `timeout` - The round barrier timeout.
    /// * `retry_budget` - Only used to tell when a failure is terminal.
    ///
    /// # Returns
    /// Every admitted worker's outcome, ascending by worker id.
    pub async fn broadcast(
        &mut self,
        snapshot: &Snapshot,
        timeout: Duration,
        retry_budget: u32,
    ) -> Vec<(usize, Result<Report, WorkerFailure>)> {
        self.state = SessionState::Running;

        let admitted = self.active_ids();
        for &worker_id in &admitted {
            let status = &mut self.statuses[worker_id];
            if status.state() == WorkerState::Ready {
                status.transition(WorkerState::Training);
            }
        }

        let deadline = Instant::now() + timeout;
        let exchanges = self
            .links
            .iter_mut()
            .filter(|(id, _)| admitted.contains(id))
            .map(|(&worker_id, link)| async move {
                let result = match time::timeout_at(deadline, link.exchange(snapshot)).await {
                    Ok(result) => result,
                    Err(_) => Err(WorkerFailure::Timeout),
                };

                (worker_id, result)
            });

        let mut results = join_all(exchanges).await;

        for (worker_id, result) in &mut results {
            if let Ok(report) = result {
                if report.grad.len() != snapshot.params.len() {
                    *result = Err(WorkerFailure::Protocol(format!(
                        "update of {} values for {} parameters",
                        report.grad.len(),
                        snapshot.params.len()
                    )));
                }
            }

            match result {
                Ok(report) => {
                    self.statuses[*worker_id].heartbeat();
                    debug!(
                        worker_id = *worker_id,
                        round = snapshot.round,
                        loss = report.loss;
                        "worker reported"
                    );
                }
                Err(e) => {
                    warn!(worker_id = *worker_id, round = snapshot.round; "worker failed: {e}");
                    self.fail(*worker_id, retry_budget);
                }
            }
        }

        results
    }

    /// Marks every worker still training as done.
    pub fn complete(&mut self) {
        for status in &mut self.statuses {
            if status.is_active() {
                status.transition(WorkerState::Done);
            }
        }

        self.state = SessionState::Completed;
    }

    /// Releases every worker and the pool, safe to call more than once and after a
    /// partial start.
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        join_all(self.links.values_mut().map(|link| link.release())).await;
        self.links.clear();
        self.pool.shutdown().await;

        if self.state != SessionState::Completed {
            self.state = SessionState::Aborted;
        }

        info!(state:? = self.state; "cluster shut down");
    }

    fn fail(&mut self, worker_id: usize, retry_budget: u32) {
        self.links.remove(&worker_id);

        let status = &mut self.statuses[worker_id];
        status.transition(WorkerState::Failed);

        if status.respawns() >= retry_budget {
            warn!(
                worker_id = worker_id,
                failures = status.failures();
                "worker exhausted its retry budget and is out of the run"
            );
        }
    }
}
