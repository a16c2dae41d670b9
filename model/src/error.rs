use std::{error::Error, fmt, io};

/// The model module's result type.
pub type Result<T> = std::result::Result<T, ModelErr>;

/// Failures while building, loading or training a model.
#[derive(Debug)]
pub enum ModelErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidConfig(String),
    Dataset(String),
    Io(io::Error),
}

impl fmt::Display for ModelErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "size mismatch in {what}: got {got}, expected {expected}"),
            Self::InvalidConfig(msg) => write!(f, "invalid model config: {msg}"),
            Self::Dataset(msg) => write!(f, "dataset error: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for ModelErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ModelErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
