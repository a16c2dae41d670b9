use log::{debug, info, warn};
use model::{ModelState, Network, optimization};
use tokio_util::sync::CancellationToken;

use crate::{
    ClusterSession, OrchestratorError,
    aggregate::aggregate,
    cluster::{Report, Snapshot, WorkerPool},
    configs::TrainingConfig,
};

/// Drives a started session through the configured rounds.
///
/// Each round broadcasts the authoritative state, waits for the workers' reports up to the
/// round timeout and, if enough of them made it, commits their aggregate. Rounds that miss
/// the quorum are retried in full, failed workers are respawned while their retry budget lasts.
///
/// # Arguments
/// * `session` - A started cluster session.
/// * `config` - The run's config.
/// * `cancel` - Aborts the run at the next suspension point, discarding the round in flight.
///
/// # Returns
/// The final model state, `InsufficientQuorum` if a round ran out of retries or
/// `Aborted` if cancelled.
pub async fn run<P: WorkerPool>(
    session: &mut ClusterSession<P>,
    config: &TrainingConfig,
    cancel: &CancellationToken,
) -> Result<ModelState, OrchestratorError> {
    let network = Network::new(&config.model)?;
    let params = network.init_params(config.training.seed)?;
    let mut state = ModelState::new(network.layout().clone(), params, config.config_hash())?;
    let mut optimizer = optimization::from_config(&config.training.optimizer, state.values().len());

    let mut calm_rounds = 0;

    for round in 0..config.training.rounds as u64 {
        let reports = run_round(session, config, &state, round, cancel).await?;
        let update = aggregate(&reports, config.fault_tolerance.aggregation);

        state.apply(&update.grad, optimizer.as_mut())?;
        state.set_epoch(round + 1);

        info!(
            round = round,
            step = state.step(),
            workers = reports.len(),
            loss = update.loss,
            norm = update.norm;
            "round committed"
        );

        if let Some(convergence) = config.training.convergence {
            if update.norm < convergence.tolerance {
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

    session.complete();
    Ok(state)
}

/// Runs attempts of `round` until one reaches the quorum.
async fn run_round<P: WorkerPool>(
    session: &mut ClusterSession<P>,
    config: &TrainingConfig,
    state: &ModelState,
    round: u64,
    cancel: &CancellationToken,
) -> Result<Vec<(usize, Report)>, OrchestratorError> {
    let policy = &config.fault_tolerance;
    let mut attempts = 0;

    loop {
        attempts += 1;

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Aborted);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestratorError::Aborted),
            readmitted = session.readmit(policy.retry_budget) => {
                if !readmitted.is_empty() {
                    debug!(round = round; "readmitted workers {readmitted:?}");
                }
            }
        }

        let admitted = session.active_ids().len();
        let required = policy.required(session.worker_count(), admitted);

        let snapshot = Snapshot {
            round,
            step: state.step(),
            params: state.snapshot(),
        };

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestratorError::Aborted),
            results = session.broadcast(&snapshot, policy.round_timeout(), policy.retry_budget) => results,
        };

        let reports: Vec<_> = results
            .into_iter()
            .filter_map(|(worker_id, result)| result.ok().map(|report| (worker_id, report)))
            .collect();

        if reports.len() >= required {
            return Ok(reports);
        }

        warn!(
            round = round,
            attempt = attempts,
            succeeded = reports.len(),
            required = required;
            "round missed its quorum"
        );

        if attempts > policy.max_round_retries {
            return Err(OrchestratorError::InsufficientQuorum {
                round,
                succeeded: reports.len(),
                required,
                attempts,
            });
        }
    }
}
