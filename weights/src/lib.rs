//! Turns trained model states into immutable, persistable weight bundles and back.

mod artifact;
mod bundle;
pub mod checksum;
mod error;
mod extract;

pub use artifact::{deserialize, load, persist, serialize};
pub use bundle::{DType, Producer, Provenance, TensorRecord, WeightBundle};
pub use error::{Result, WeightsErr};
pub use extract::{extract, extract_at, restore};
