//! Process entry points of the trainer: mode dispatch, single-node training,
//! batch prediction and the prediction service. Distributed training lives in
//! the `orchestrator` and `worker` crates.

mod error;
pub mod local;
pub mod mode;
pub mod predict;
pub mod serve;
pub mod settings;

use log::info;
use orchestrator::configs::TrainingConfig;
use tokio_util::sync::CancellationToken;

pub use error::AppError;
pub use mode::Mode;
pub use settings::{Role, Settings};

use crate::predict::Predictor;

/// Runs `mode` to completion.
///
/// # Arguments
/// * `mode` - The entry point to run.
/// * `settings` - The process environment.
/// * `cancel` - Aborts the run, releasing everything it started.
///
/// # Returns
/// `Ok(())` on success or the error that ended the run.
pub async fn run(mode: Mode, settings: &Settings, cancel: CancellationToken) -> Result<(), AppError> {
    info!(mode:% = mode, config:% = settings.config_path.display(); "starting");

    match mode {
        Mode::Serve => {
            let config = TrainingConfig::load(&settings.config_path)?;
            let predictor = Predictor::load(&config)?;
            serve::run(predictor, settings.port, cancel).await?;
        }
        Mode::TrainLocal => {
            let config = TrainingConfig::load(&settings.config_path)?;
            tokio::task::spawn_blocking(move || local::train(&config, &cancel).map(|_| ()))
                .await
                .map_err(|e| AppError::Io(e.into()))??;
        }
        Mode::TrainDistributed => {
            let config = TrainingConfig::load(&settings.config_path)?;
            match &settings.role {
                Role::Head => {
                    orchestrator::train_distributed(&config, &cancel).await?;
                }
                Role::Worker {
                    head_addr,
                    worker_id,
                } => {
                    let worker_spec = config.worker_spec();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(AppError::Aborted),
                        joined = worker::join(head_addr.as_str(), *worker_id, &worker_spec) => joined?,
                    }
                }
            }
        }
        Mode::Predict => {
            let config = TrainingConfig::load(&settings.config_path)?;
            predict::run(&config, settings.predict_input.as_deref())?;
        }
    }

    Ok(())
}
