//! Single-node training: the per-round update of one distributed worker run over
//! the whole dataset, with no barrier and no aggregation.

use log::{debug, info};
use model::{Dataset, ModelState, Network, optimization};
use orchestrator::configs::TrainingConfig;
use tokio_util::sync::CancellationToken;
use weights::{Producer, WeightBundle};

use crate::AppError;

/// Trains on this process only and returns the final state.
///
/// # Arguments
/// * `config` - The run's config.
/// * `cancel` - Checked between rounds, a cancelled run discards the round in flight.
///
/// # Returns
/// The final model state or `Aborted` if cancelled.
pub fn run(config: &TrainingConfig, cancel: &CancellationToken) -> Result<ModelState, AppError> {
    let network = Network::new(&config.model)?;
    let dataset = Dataset::load(&config.dataset)?;
    let batch_size = config.worker_spec().batch_size;

    let params = network.init_params(config.training.seed)?;
    let mut state = ModelState::new(network.layout().clone(), params, config.config_hash())?;
    let mut optimizer = optimization::from_config(&config.training.optimizer, state.values().len());

    info!(records = dataset.len(), params = state.values().len(); "starting local training");

    let mut calm_rounds = 0;

    for round in 0..config.training.rounds as u64 {
        if cancel.is_cancelled() {
            return Err(AppError::Aborted);
        }

        let update = network.local_update(state.values(), &dataset, batch_size)?;
        let norm = update
            .grad
            .iter()
            .map(|g| f64::from(*g).powi(2))
            .sum::<f64>()
            .sqrt() as f32;

        state.apply(&update.grad, optimizer.as_mut())?;
        state.set_epoch(round + 1);

        debug!(round = round, step = state.step(), loss = update.loss, norm = norm; "round committed");

        if let Some(convergence) = config.training.convergence {
            if norm < convergence.tolerance {
                calm_rounds += 1;
            } else {
                calm_rounds = 0;
            }

            if calm_rounds >= convergence.patience {
                info!(round = round; "converged, stopping early");
                break;
            }
        }
    }

    Ok(state)
}

/// Trains on this process and persists the resulting weights.
///
/// # Returns
/// The persisted bundle, nothing is persisted on error.
pub fn train(config: &TrainingConfig, cancel: &CancellationToken) -> Result<WeightBundle, AppError> {
    let state = run(config, cancel)?;

    let bundle = weights::extract(&state, Producer::Local);
    weights::persist(&bundle, &config.output.artifact_path)?;

    info!(
        step = state.step(),
        epoch = state.epoch(),
        tensors = bundle.len(),
        params = state.values().len(),
        config_hash = state.config_hash(),
        path:% = config.output.artifact_path.display();
        "local training finished"
    );

    Ok(bundle)
}
