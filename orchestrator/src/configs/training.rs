use std::{path::PathBuf, time::Duration};

use model::config::OptimizerConfig;
use serde::{Deserialize, Serialize};

const DEFAULT_BATCH_SIZE: usize = 32;
const DEFAULT_LEARNING_RATE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    /// Rounds whose applied update has an L2 norm below this count towards convergence.
    pub tolerance: f32,
    #[serde(default = "default_patience")]
    pub patience: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    pub rounds: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_optimizer")]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub convergence: Option<ConvergenceConfig>,
}

/// What the configured quorum fraction is taken of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumBasis {
    /// The configured worker count.
    #[default]
    Configured,
    /// The workers admitted into the round attempt.
    Active,
}

/// How the accepted reports of a round are merged into one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Mean,
    Sum,
    /// Mean weighted by the amount of samples each worker trained on.
    WeightedMean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultToleranceConfig {
    pub quorum_fraction: f64,
    pub quorum_basis: QuorumBasis,
    /// How many times a failed worker may be respawned.
    pub retry_budget: u32,
    pub max_round_retries: u32,
    pub round_timeout_ms: u64,
    pub aggregation: Aggregation,
}

impl Default for FaultToleranceConfig {
    fn default() -> Self {
        Self {
            quorum_fraction: 1.0,
            quorum_basis: QuorumBasis::Configured,
            retry_budget: 2,
            max_round_retries: 3,
            round_timeout_ms: 30_000,
            aggregation: Aggregation::Mean,
        }
    }
}

impl FaultToleranceConfig {
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    /// The amount of reports a round attempt needs to be accepted.
    ///
    /// # Arguments
    /// * `configured` - The configured worker count.
    /// * `admitted` - The workers admitted into the attempt.
    ///
    /// # Returns
    /// `ceil(quorum_fraction × basis)`, never less than one.
    pub fn required(&self, configured: usize, admitted: usize) -> usize {
        let basis = match self.quorum_basis {
            QuorumBasis::Configured => configured,
            QuorumBasis::Active => admitted,
        };

        let required = (self.quorum_fraction * basis as f64 - 1e-9).ceil() as usize;
        required.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub artifact_path: PathBuf,
}

fn default_patience() -> usize {
    1
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_optimizer() -> OptimizerConfig {
    OptimizerConfig::GradientDescent {
        lr: DEFAULT_LEARNING_RATE,
    }
}
