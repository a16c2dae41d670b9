mod cluster;
mod training;

use std::{
    env, fs,
    net::SocketAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use log::{debug, info};
use model::config::{DatasetConfig, ModelConfig, OptimizerConfig};
use serde::{Deserialize, Serialize};
use worker::WorkerSpec;

pub use cluster::{ClusterConfig, LauncherConfig, ResourcesConfig};
pub use training::{
    Aggregation, ConvergenceConfig, FaultToleranceConfig, HyperParams, OutputConfig, QuorumBasis,
};

use crate::ConfigError;

/// Everything a run needs, loaded once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub cluster: ClusterConfig,
    pub training: HyperParams,
    #[serde(default)]
    pub fault_tolerance: FaultToleranceConfig,
    pub model: ModelConfig,
    pub dataset: DatasetConfig,
    pub output: OutputConfig,
}

impl TrainingConfig {
    /// Reads, parses and validates the config file at `path`, applying the
    /// `ORCHESTRA_*` overrides found in the process environment.
    ///
    /// # Arguments
    /// * `path` - The JSON config file.
    ///
    /// # Returns
    /// The validated config or a `ConfigError` naming what is wrong.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| env::var(key).ok())
    }

    /// Same as [`TrainingConfig::load`], reading overrides through `var`.
    pub fn load_with<F>(path: &Path, var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_json_with(&content, var)?;
        info!(
            path:% = path.display(),
            workers = config.cluster.worker_count,
            rounds = config.training.rounds;
            "loaded config"
        );

        Ok(config)
    }

    /// Parses and validates a config, unknown fields are ignored.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Self::from_json_with(json, |_| None)
    }

    /// Parses a config, applies the overrides `var` yields and validates the result.
    pub fn from_json_with<F>(json: &str, var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Self = serde_json::from_str(json)?;
        config.apply_overrides(var)?;
        config.validate()?;
        Ok(config)
    }

    /// Replaces file values with the `ORCHESTRA_*` variables `var` knows of.
    ///
    /// | variable                  | field                  |
    /// |---------------------------|------------------------|
    /// | `ORCHESTRA_ARTIFACT_PATH` | `output.artifact_path` |
    /// | `ORCHESTRA_WORKER_COUNT`  | `cluster.worker_count` |
    /// | `ORCHESTRA_BIND_ADDR`     | `cluster.bind_addr`    |
    /// | `ORCHESTRA_DATASET_PATH`  | `dataset.path`         |
    pub fn apply_overrides<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = var("ORCHESTRA_ARTIFACT_PATH") {
            debug!(path:% = path; "artifact path overridden");
            self.output.artifact_path = PathBuf::from(path);
        }

        if let Some(count) = var("ORCHESTRA_WORKER_COUNT") {
            self.cluster.worker_count = count.parse().map_err(|_| {
                ConfigError::Invalid(format!(
                    "ORCHESTRA_WORKER_COUNT '{count}' is not a worker count"
                ))
            })?;
            debug!(workers = self.cluster.worker_count; "worker count overridden");
        }

        if let Some(addr) = var("ORCHESTRA_BIND_ADDR") {
            debug!(addr:% = addr; "bind address overridden");
            self.cluster.bind_addr = addr;
        }

        if let Some(new_path) = var("ORCHESTRA_DATASET_PATH") {
            let DatasetConfig::Local { path, .. } = &mut self.dataset else {
                return Err(ConfigError::Invalid(
                    "ORCHESTRA_DATASET_PATH needs a local dataset".into(),
                ));
            };
            debug!(path:% = new_path; "dataset path overridden");
            *path = PathBuf::from(new_path);
        }

        Ok(())
    }

    /// Checks every constraint that can be checked without provisioning anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        let cluster = &self.cluster;
        if cluster.worker_count == 0 {
            return invalid("cluster.worker_count must be greater than 0");
        }
        if cluster.start_attempts == 0 {
            return invalid("cluster.start_attempts must be greater than 0");
        }
        if cluster.startup_timeout_ms == 0 {
            return invalid("cluster.startup_timeout_ms must be greater than 0");
        }
        if cluster.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "cluster.bind_addr '{}' is not a socket address",
                cluster.bind_addr
            )));
        }

        let training = &self.training;
        if training.rounds == 0 {
            return invalid("training.rounds must be greater than 0");
        }
        if training.batch_size == 0 {
            return invalid("training.batch_size must be greater than 0");
        }

        let lr = training.optimizer.learning_rate();
        if !(lr.is_finite() && lr > 0.0) {
            return invalid("training.optimizer.lr must be a positive number");
        }
        if let OptimizerConfig::Momentum { mu, .. } = training.optimizer {
            if !(0.0..1.0).contains(&mu) {
                return invalid("training.optimizer.mu must be in [0, 1)");
            }
        }

        if let Some(convergence) = training.convergence {
            if !(convergence.tolerance.is_finite() && convergence.tolerance >= 0.0) {
                return invalid("training.convergence.tolerance must be a non negative number");
            }
            if convergence.patience == 0 {
                return invalid("training.convergence.patience must be greater than 0");
            }
        }

        let fault_tolerance = &self.fault_tolerance;
        let fraction = fault_tolerance.quorum_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return invalid("fault_tolerance.quorum_fraction must be in (0, 1]");
        }
        if fault_tolerance.round_timeout_ms == 0 {
            return invalid("fault_tolerance.round_timeout_ms must be greater than 0");
        }

        self.model.validate()?;

        let (x_size, y_size) = self.dataset.row_shape();
        if x_size != self.model.input_size() || y_size != self.model.output_size() {
            return Err(ConfigError::Invalid(format!(
                "dataset rows ({x_size} -> {y_size}) don't fit the model ({} -> {})",
                self.model.input_size(),
                self.model.output_size()
            )));
        }

        if let DatasetConfig::Inline { data, .. } = &self.dataset {
            if data.len() % (x_size + y_size) != 0 {
                return Err(ConfigError::Invalid(format!(
                    "dataset length ({}) is not divisible by x_size + y_size ({})",
                    data.len(),
                    x_size + y_size
                )));
            }
        }

        if self.output.artifact_path.as_os_str().is_empty() {
            return invalid("output.artifact_path must not be empty");
        }

        Ok(())
    }

    /// SHA-256 of the canonical JSON form of this config.
    pub fn config_hash(&self) -> String {
        // Every field serializes to JSON, there are no non string-key maps.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        weights::checksum::digest_hex(&canonical)
    }

    /// What every worker of this run trains and on which data.
    pub fn worker_spec(&self) -> WorkerSpec {
        WorkerSpec {
            model: self.model.clone(),
            dataset: self.dataset.clone(),
            batch_size: NonZeroUsize::new(self.training.batch_size).unwrap_or(NonZeroUsize::MIN),
            worker_count: NonZeroUsize::new(self.cluster.worker_count)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}
