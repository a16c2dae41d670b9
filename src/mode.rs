use std::{fmt, str::FromStr};

use crate::AppError;

/// The entry point a process runs, picked once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Prediction service over the persisted weights.
    Serve,
    /// Single-node training.
    TrainLocal,
    /// Distributed training, as head or as worker.
    TrainDistributed,
    /// Batch prediction from a file or stdin.
    Predict,
}

impl Mode {
    /// Resolves the mode from the first CLI argument, falling back to `APP_MODE`.
    ///
    /// # Arguments
    /// * `arg` - The first CLI argument, if any.
    /// * `env` - The value of `APP_MODE`, if set.
    ///
    /// # Returns
    /// The mode or a `Mode` error if neither names one.
    pub fn resolve(arg: Option<&str>, env: Option<&str>) -> Result<Self, AppError> {
        match arg.or(env) {
            Some(name) => name.parse(),
            None => Err(AppError::Mode(
                "no run mode given, pass one as argument or set APP_MODE".into(),
            )),
        }
    }
}

impl FromStr for Mode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "serve" | "api" => Ok(Self::Serve),
            "train" => Ok(Self::TrainLocal),
            "train_distributed" => Ok(Self::TrainDistributed),
            "predict" => Ok(Self::Predict),
            other => Err(AppError::Mode(format!(
                "unknown run mode '{other}', expected one of serve, train, train_distributed, predict"
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Serve => "serve",
            Self::TrainLocal => "train",
            Self::TrainDistributed => "train_distributed",
            Self::Predict => "predict",
        };
        write!(f, "{name}")
    }
}
