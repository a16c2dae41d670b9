use std::{fmt, time::Instant};

use log::warn;

/// The lifecycle of a single worker as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Ready,
    Training,
    Failed,
    Done,
}

impl WorkerState {
    /// Whether `self → to` is a legal transition.
    pub fn can_become(self, to: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, to),
            (Starting, Ready)
                | (Starting, Failed)
                | (Ready, Training)
                | (Ready, Failed)
                | (Ready, Done)
                | (Training, Failed)
                | (Training, Done)
                | (Failed, Starting)
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Training => "training",
            Self::Failed => "failed",
            Self::Done => "done",
        };

        f.write_str(name)
    }
}

/// The coordinator's record of one worker, only mutated from worker reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    id: usize,
    state: WorkerState,
    last_heartbeat: Option<Instant>,
    failures: u32,
    respawns: u32,
}

impl WorkerStatus {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            state: WorkerState::Starting,
            last_heartbeat: None,
            failures: 0,
            respawns: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat
    }

    /// How many times this worker failed.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// How many times this worker was respawned after failing.
    pub fn respawns(&self) -> u32 {
        self.respawns
    }

    /// Whether the worker takes part in the next broadcast.
    pub fn is_active(&self) -> bool {
        matches!(self.state, WorkerState::Ready | WorkerState::Training)
    }

    /// Moves the worker to `to`, illegal transitions are ignored.
    ///
    /// # Returns
    /// Whether the transition happened.
    pub fn transition(&mut self, to: WorkerState) -> bool {
        if !self.state.can_become(to) {
            warn!(worker_id = self.id; "ignoring transition {} -> {to}", self.state);
            return false;
        }

        match to {
            WorkerState::Failed => self.failures += 1,
            WorkerState::Starting => self.respawns += 1,
            _ => {}
        }

        self.state = to;
        true
    }

    /// Records that the worker reported back.
    pub fn heartbeat(&mut self) {
        self.last_heartbeat = Some(Instant::now());
    }
}

/// The lifecycle of a cluster session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Running,
    Completed,
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut status = WorkerStatus::new(3);

        assert!(status.transition(WorkerState::Ready));
        assert!(status.transition(WorkerState::Training));
        assert!(status.transition(WorkerState::Done));
        assert_eq!(status.failures(), 0);
    }

    #[test]
    fn test_retry_cycle_is_counted() {
        let mut status = WorkerStatus::new(0);
        status.transition(WorkerState::Ready);
        status.transition(WorkerState::Training);

        assert!(status.transition(WorkerState::Failed));
        assert!(status.transition(WorkerState::Starting));
        assert!(status.transition(WorkerState::Ready));

        assert_eq!((status.failures(), status.respawns()), (1, 1));
        assert!(status.is_active());
    }

    #[test]
    fn test_illegal_transitions_are_ignored() {
        let mut status = WorkerStatus::new(0);

        assert!(!status.transition(WorkerState::Training));
        assert!(!status.transition(WorkerState::Done));
        assert_eq!(status.state(), WorkerState::Starting);

        status.transition(WorkerState::Failed);
        assert!(!status.transition(WorkerState::Ready));
        assert!(!status.is_active());
    }

    #[test]
    fn test_heartbeat_is_recorded() {
        let mut status = WorkerStatus::new(0);
        assert!(status.last_heartbeat().is_none());

        status.heartbeat();
        assert!(status.last_heartbeat().is_some());
    }
}
