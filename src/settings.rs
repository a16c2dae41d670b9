use std::{env, path::PathBuf};

use orchestrator::ConfigError;

const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_PORT: u16 = 8080;

/// Which side of a distributed run this process plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Head,
    Worker { head_addr: String, worker_id: usize },
}

/// The process environment, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub config_path: PathBuf,
    pub port: u16,
    /// Where `predict` reads its records from, stdin if unset.
    pub predict_input: Option<PathBuf>,
    pub role: Role,
}

impl Settings {
    /// Reads the settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Reads the settings through `var`, which maps a variable name to its value.
    ///
    /// # Arguments
    /// * `var` - The variable lookup.
    ///
    /// # Returns
    /// The settings or an `Invalid` error naming the offending variable.
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let port = match var("PORT") {
            Some(port) => port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT '{port}' is not a port number")))?,
            None => DEFAULT_PORT,
        };

        let role = match var("CLUSTER_ROLE").as_deref() {
            None | Some("head") => Role::Head,
            Some("worker") => {
                let head_addr = var("HEAD_ADDR").ok_or_else(|| {
                    ConfigError::Invalid("HEAD_ADDR is required for a worker".into())
                })?;
                let worker_id = var("WORKER_ID")
                    .ok_or_else(|| ConfigError::Invalid("WORKER_ID is required for a worker".into()))?;
                let worker_id = worker_id.parse().map_err(|_| {
                    ConfigError::Invalid(format!("WORKER_ID '{worker_id}' is not a worker id"))
                })?;

                Role::Worker {
                    head_addr,
                    worker_id,
                }
            }
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "CLUSTER_ROLE '{other}' must be either head or worker"
                )));
            }
        };

        Ok(Self {
            config_path,
            port,
            predict_input: var("PREDICT_INPUT").map(PathBuf::from),
            role,
        })
    }
}
