pub mod config;
mod dataset;
mod error;
mod layout;
mod network;
pub mod optimization;
mod state;

pub use dataset::Dataset;
pub use error::{ModelErr, Result};
pub use layout::{ParamLayout, ParamSpec};
pub use network::{Network, Update};
pub use state::ModelState;
