//! Head side of distributed training: cluster lifecycle, round coordination and
//! hand-off of the final state to the weight artifact.

pub mod aggregate;
pub mod cluster;
pub mod configs;
pub mod coordinator;
mod error;
mod session;
pub mod status;

use log::info;
use tokio_util::sync::CancellationToken;
use weights::{Producer, WeightBundle};

pub use error::{ConfigError, OrchestratorError, WorkerFailure};
pub use session::ClusterSession;

use crate::{
    cluster::{TcpPool, WorkerPool},
    configs::TrainingConfig,
};

/// Binds the head endpoint and starts every configured worker.
///
/// # Arguments
/// * `config` - The run's config.
///
/// # Returns
/// A running session or a `ClusterStart` error, nothing is left running in that case.
pub async fn start_cluster(
    config: &TrainingConfig,
) -> Result<ClusterSession<TcpPool>, OrchestratorError> {
    let pool = TcpPool::bind(config).await?;
    ClusterSession::start(pool, config).await
}

/// Runs a whole distributed training and persists the resulting weights.
///
/// # Arguments
/// * `config` - The run's config.
/// * `cancel` - Aborts the run, tearing the cluster down.
///
/// # Returns
/// The persisted bundle, nothing is persisted on error.
pub async fn train_distributed(
    config: &TrainingConfig,
    cancel: &CancellationToken,
) -> Result<WeightBundle, OrchestratorError> {
    let session = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(OrchestratorError::Aborted),
        session = start_cluster(config) => session?,
    };

    train_session(session, config, cancel).await
}

/// Runs the rounds on an already started session, always shutting it down afterwards.
///
/// # Arguments
/// * `session` - A started session.
/// * `config` - The run's config.
/// * `cancel` - Aborts the run.
///
/// # Returns
/// The persisted bundle, nothing is persisted on error.
pub async fn train_session<P: WorkerPool>(
    mut session: ClusterSession<P>,
    config: &TrainingConfig,
    cancel: &CancellationToken,
) -> Result<WeightBundle, OrchestratorError> {
    let result = coordinator::run(&mut session, config, cancel).await;
    session.shutdown().await;
    let state = result?;

    let bundle = weights::extract(&state, Producer::Distributed);
    weights::persist(&bundle, &config.output.artifact_path)?;

    info!(
        step = state.step(),
        epoch = state.epoch(),
        tensors = bundle.len(),
        params = state.values().len(),
        config_hash = state.config_hash(),
        path:% = config.output.artifact_path.display();
        "distributed training finished"
    );

    Ok(bundle)
}
