use std::{error::Error, fmt, io, path::PathBuf};

use model::ModelErr;
use weights::WeightsErr;

/// Bad or missing configuration, always detected before any worker is started.
#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: io::Error },
    Parse(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "cannot read config '{}': {source}", path.display())
            }
            Self::Parse(e) => write!(f, "malformed config: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

impl From<ModelErr> for ConfigError {
    fn from(value: ModelErr) -> Self {
        Self::Invalid(value.to_string())
    }
}

/// Why a single worker dropped out, absorbed by the coordinator while the retry budget lasts.
#[derive(Debug)]
pub enum WorkerFailure {
    /// Missed the round barrier or the startup deadline.
    Timeout,
    /// The connection to the worker broke.
    Disconnected(io::Error),
    /// The worker answered with something the protocol doesn't allow.
    Protocol(String),
    /// The worker reported an error of its own.
    Reported(String),
    /// The worker couldn't be launched.
    Launch(String),
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Disconnected(e) => write!(f, "disconnected: {e}"),
            Self::Protocol(msg) => write!(f, "protocol violation: {msg}"),
            Self::Reported(msg) => write!(f, "worker error: {msg}"),
            Self::Launch(msg) => write!(f, "launch failed: {msg}"),
        }
    }
}

impl Error for WorkerFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Disconnected(e) => Some(e),
            _ => None,
        }
    }
}

/// All errors that can end a distributed run.
#[derive(Debug)]
pub enum OrchestratorError {
    Config(ConfigError),
    /// The head or the requested workers couldn't be provisioned.
    ClusterStart(String),
    /// A round kept missing its quorum after every allowed retry.
    InsufficientQuorum {
        round: u64,
        succeeded: usize,
        required: usize,
        attempts: u32,
    },
    /// The run was cancelled from outside.
    Aborted,
    Model(ModelErr),
    Weights(WeightsErr),
    Io(io::Error),
}

impl OrchestratorError {
    /// The name of the error kind, as shown to the user.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::ClusterStart(_) => "ClusterStartError",
            Self::InsufficientQuorum { .. } => "InsufficientQuorumError",
            Self::Aborted => "Aborted",
            Self::Model(_) => "ModelError",
            Self::Weights(WeightsErr::Serialization(_)) => "SerializationError",
            Self::Weights(WeightsErr::CorruptArtifact(_)) => "CorruptArtifactError",
            Self::Weights(_) => "WeightsError",
            Self::Io(_) => "IoError",
        }
    }
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::ClusterStart(msg) => write!(f, "cluster start failed: {msg}"),
            Self::InsufficientQuorum {
                round,
                succeeded,
                required,
                attempts,
            } => write!(
                f,
                "round {round} reached {succeeded} of {required} required reports after {attempts} attempts"
            ),
            Self::Aborted => write!(f, "run aborted"),
            Self::Model(e) => write!(f, "model error: {e}"),
            Self::Weights(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Model(e) => Some(e),
            Self::Weights(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for OrchestratorError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<ModelErr> for OrchestratorError {
    fn from(value: ModelErr) -> Self {
        Self::Model(value)
    }
}

impl From<WeightsErr> for OrchestratorError {
    fn from(value: WeightsErr) -> Self {
        Self::Weights(value)
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
