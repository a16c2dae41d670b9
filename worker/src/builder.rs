use std::num::NonZeroUsize;

use log::debug;
use model::{
    Dataset, ModelErr, Network,
    config::{DatasetConfig, ModelConfig},
};

use crate::{Result, Worker};

/// Everything a worker needs to train its share of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSpec {
    pub model: ModelConfig,
    pub dataset: DatasetConfig,
    pub batch_size: NonZeroUsize,
    /// The amount of shards the dataset is split into.
    pub worker_count: NonZeroUsize,
}

pub struct WorkerBuilder;

impl WorkerBuilder {
    /// Builds a `Worker` from a `WorkerSpec`.
    ///
    /// # Arguments
    /// * `worker_id` - The worker's id, which also selects its data shard.
    /// * `spec` - What to train and on which data.
    ///
    /// # Returns
    /// A fully initialized `Worker` or an error if the model and dataset don't fit together.
    pub fn build(worker_id: usize, spec: &WorkerSpec) -> Result<Worker> {
        let network = Network::new(&spec.model)?;

        let (x_size, y_size) = spec.dataset.row_shape();
        if x_size != spec.model.input_size() || y_size != spec.model.output_size() {
            return Err(ModelErr::InvalidConfig(format!(
                "dataset rows ({x_size} -> {y_size}) don't fit the model ({} -> {})",
                spec.model.input_size(),
                spec.model.output_size()
            ))
            .into());
        }

        let shard = Dataset::load(&spec.dataset)?.shard(worker_id, spec.worker_count)?;
        debug!(worker_id = worker_id, records = shard.len(); "loaded shard");

        Ok(Worker::new(worker_id, network, shard, spec.batch_size))
    }
}
