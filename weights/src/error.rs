use std::{error::Error, fmt, io};

use model::ModelErr;

/// The weights module's result type.
pub type Result<T> = std::result::Result<T, WeightsErr>;

/// Weight I/O failures, always fatal for the operation attempting it.
#[derive(Debug)]
pub enum WeightsErr {
    /// The bundle can't be represented in the artifact format.
    Serialization(String),
    /// The artifact's structure or checksum is invalid.
    CorruptArtifact(String),
    /// The bundle doesn't fit the model it's being restored into.
    Incompatible(String),
    Model(ModelErr),
    Io(io::Error),
}

impl fmt::Display for WeightsErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialization(msg) => write!(f, "cannot serialize weights: {msg}"),
            Self::CorruptArtifact(msg) => write!(f, "corrupt weight artifact: {msg}"),
            Self::Incompatible(msg) => write!(f, "incompatible weights: {msg}"),
            Self::Model(e) => write!(f, "model error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for WeightsErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Model(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WeightsErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ModelErr> for WeightsErr {
    fn from(value: ModelErr) -> Self {
        Self::Model(value)
    }
}
