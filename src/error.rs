use std::{error::Error, fmt, io};

use model::ModelErr;
use orchestrator::{ConfigError, OrchestratorError};
use weights::WeightsErr;
use worker::WorkerErr;

/// Everything that can end a run of the binary.
#[derive(Debug)]
pub enum AppError {
    /// The run mode couldn't be resolved, nothing was started.
    Mode(String),
    Config(ConfigError),
    Orchestrator(OrchestratorError),
    Worker(WorkerErr),
    Model(ModelErr),
    Weights(WeightsErr),
    /// Bad records fed to the predictor.
    Input(anyhow::Error),
    /// The run was cancelled from outside.
    Aborted,
    Io(io::Error),
}

impl AppError {
    /// The name of the error kind, as shown to the user.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mode(_) => "ModeError",
            Self::Config(_) => "ConfigError",
            Self::Orchestrator(e) => e.kind(),
            Self::Worker(_) => "WorkerFailure",
            Self::Model(_) => "ModelError",
            Self::Weights(WeightsErr::Serialization(_)) => "SerializationError",
            Self::Weights(WeightsErr::CorruptArtifact(_)) => "CorruptArtifactError",
            Self::Weights(WeightsErr::Incompatible(_)) => "IncompatibleArtifactError",
            Self::Weights(_) => "WeightsError",
            Self::Input(_) => "InputError",
            Self::Aborted => "Aborted",
            Self::Io(_) => "IoError",
        }
    }

    /// The process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Mode(_) => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mode(msg) => write!(f, "{msg}"),
            Self::Config(e) => write!(f, "{e}"),
            Self::Orchestrator(e) => write!(f, "{e}"),
            Self::Worker(e) => write!(f, "worker error: {e}"),
            Self::Model(e) => write!(f, "model error: {e}"),
            Self::Weights(e) => write!(f, "{e}"),
            Self::Input(e) => write!(f, "bad input: {e:#}"),
            Self::Aborted => write!(f, "run aborted"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Orchestrator(e) => Some(e),
            Self::Worker(e) => Some(e),
            Self::Model(e) => Some(e),
            Self::Weights(e) => Some(e),
            Self::Input(e) => Some(&**e),
            Self::Io(e) => Some(e),
            Self::Mode(_) | Self::Aborted => None,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<OrchestratorError> for AppError {
    fn from(value: OrchestratorError) -> Self {
        match value {
            OrchestratorError::Config(e) => Self::Config(e),
            OrchestratorError::Aborted => Self::Aborted,
            e => Self::Orchestrator(e),
        }
    }
}

impl From<WorkerErr> for AppError {
    fn from(value: WorkerErr) -> Self {
        Self::Worker(value)
    }
}

impl From<ModelErr> for AppError {
    fn from(value: ModelErr) -> Self {
        Self::Model(value)
    }
}

impl From<WeightsErr> for AppError {
    fn from(value: WeightsErr) -> Self {
        Self::Weights(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Input(value)
    }
}

impl From<io::Error> for AppError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
