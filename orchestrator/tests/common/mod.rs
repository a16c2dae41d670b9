#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashSet},
    num::NonZeroUsize,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use model::{Dataset, ModelState, Network, optimization};
use orchestrator::{
    WorkerFailure,
    aggregate::aggregate,
    cluster::{Report, Snapshot, WorkerLink, WorkerPool},
    configs::TrainingConfig,
};

/// What the fake workers should get wrong.
#[derive(Debug, Default)]
pub struct Script {
    /// `(worker, round)` pairs whose first exchange fails.
    pub fail_once: HashSet<(usize, u64)>,
    /// `(worker, round)` pairs whose first exchange never answers.
    pub hang_once: HashSet<(usize, u64)>,
    /// Workers whose every exchange fails.
    pub always_fail: HashSet<usize>,
    /// Workers that can't be spawned.
    pub unstartable: HashSet<usize>,
}

/// What happened during a run.
#[derive(Debug, Default)]
pub struct Record {
    pub spawns: BTreeMap<usize, usize>,
    /// The workers whose exchange succeeded, per round.
    pub reported: BTreeMap<u64, Vec<usize>>,
    pub released: Vec<usize>,
    pub pool_shutdowns: usize,
}

/// Workers running on the test's task computing real updates on their shards.
pub struct FakePool {
    network: Arc<Network>,
    shards: Arc<Vec<Dataset>>,
    batch_size: NonZeroUsize,
    script: Arc<Mutex<Script>>,
    record: Arc<Mutex<Record>>,
}

impl FakePool {
    pub fn new(config: &TrainingConfig, script: Script) -> Self {
        let spec = config.worker_spec();
        let dataset = Dataset::load(&spec.dataset).unwrap();
        let shards = (0..spec.worker_count.get())
            .map(|i| dataset.shard(i, spec.worker_count).unwrap())
            .collect();

        Self {
            network: Arc::new(Network::new(&spec.model).unwrap()),
            shards: Arc::new(shards),
            batch_size: spec.batch_size,
            script: Arc::new(Mutex::new(script)),
            record: Arc::new(Mutex::new(Record::default())),
        }
    }

    pub fn record(&self) -> Arc<Mutex<Record>> {
        self.record.clone()
    }
}

impl WorkerPool for FakePool {
    type Link = FakeLink;

    async fn spawn(&mut self, worker_id: usize) -> Result<FakeLink, WorkerFailure> {
        *self
            .record
            .lock()
            .unwrap()
            .spawns
            .entry(worker_id)
            .or_default() += 1;

        if self.script.lock().unwrap().unstartable.contains(&worker_id) {
            return Err(WorkerFailure::Launch("unstartable".into()));
        }

        Ok(FakeLink {
            worker_id,
            network: self.network.clone(),
            shards: self.shards.clone(),
            batch_size: self.batch_size,
            script: self.script.clone(),
            record: self.record.clone(),
        })
    }

    async fn shutdown(&mut self) {
        self.record.lock().unwrap().pool_shutdowns += 1;
    }
}

pub struct FakeLink {
    worker_id: usize,
    network: Arc<Network>,
    shards: Arc<Vec<Dataset>>,
    batch_size: NonZeroUsize,
    script: Arc<Mutex<Script>>,
    record: Arc<Mutex<Record>>,
}

impl WorkerLink for FakeLink {
    async fn exchange(&mut self, snapshot: &Snapshot) -> Result<Report, WorkerFailure> {
        let key = (self.worker_id, snapshot.round);
        let (fail, hang) = {
            let mut script = self.script.lock().unwrap();
            let fail = script.always_fail.contains(&self.worker_id) || script.fail_once.remove(&key);
            (fail, script.hang_once.remove(&key))
        };

        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if fail {
            return Err(WorkerFailure::Reported("injected failure".into()));
        }

        let update = self
            .network
            .local_update(&snapshot.params, &self.shards[self.worker_id], self.batch_size)
            .map_err(|e| WorkerFailure::Reported(e.to_string()))?;

        self.record
            .lock()
            .unwrap()
            .reported
            .entry(snapshot.round)
            .or_default()
            .push(self.worker_id);

        Ok(Report {
            samples: update.samples,
            loss: update.loss,
            grad: update.grad,
        })
    }

    async fn release(&mut self) {
        self.record.lock().unwrap().released.push(self.worker_id);
    }
}

/// A small regression problem split across `workers` workers.
pub fn config(workers: usize, rounds: usize, artifact: &Path) -> TrainingConfig {
    let data: Vec<f32> = (0..24)
        .flat_map(|i| {
            let x0 = (i % 5) as f32 * 0.2;
            let x1 = (i % 3) as f32 * 0.5;
            [x0, x1, 0.7 * x0 - 0.4 * x1 + 0.1]
        })
        .collect();

    let json = serde_json::json!({
        "cluster": { "worker_count": workers, "start_attempts": 2 },
        "training": {
            "rounds": rounds,
            "batch_size": 4,
            "seed": 11,
            "optimizer": { "kind": "gradient_descent", "lr": 0.2 }
        },
        "fault_tolerance": {
            "quorum_fraction": 1.0,
            "retry_budget": 2,
            "max_round_retries": 3,
            "round_timeout_ms": 1000
        },
        "model": { "layers": [
            { "input": 2, "output": 3, "activation": "sigmoid" },
            { "input": 3, "output": 1 }
        ] },
        "dataset": { "kind": "inline", "data": data, "x_size": 2, "y_size": 1 },
        "output": { "artifact_path": artifact }
    });

    TrainingConfig::from_json(&json.to_string()).unwrap()
}

/// Replays a run by hand, `included[r]` being the workers accepted in round `r`.
pub fn replay(config: &TrainingConfig, included: &[Vec<usize>]) -> ModelState {
    let spec = config.worker_spec();
    let network = Network::new(&config.model).unwrap();
    let dataset = Dataset::load(&config.dataset).unwrap();
    let params = network.init_params(config.training.seed).unwrap();
    let mut state = ModelState::new(network.layout().clone(), params, config.config_hash()).unwrap();
    let mut optimizer = optimization::from_config(&config.training.optimizer, state.values().len());

    for (round, workers) in included.iter().enumerate() {
        let reports: Vec<_> = workers
            .iter()
            .map(|&id| {
                let shard = dataset.shard(id, spec.worker_count).unwrap();
                let update = network
                    .local_update(state.values(), &shard, spec.batch_size)
                    .unwrap();
                let report = Report {
                    samples: update.samples,
                    loss: update.loss,
                    grad: update.grad,
                };
                (id, report)
            })
            .collect();

        let update = aggregate(&reports, config.fault_tolerance.aggregation);
        state.apply(&update.grad, optimizer.as_mut()).unwrap();
        state.set_epoch(round as u64 + 1);
    }

    state
}
