use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:0";
const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_START_ATTEMPTS: u32 = 3;

/// Advisory per-worker resources, logged and handed to launched workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesConfig {
    #[serde(default)]
    pub cpus: Option<f32>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LauncherConfig {
    /// Workers run as tasks of the head's runtime and connect over loopback.
    #[default]
    InProcess,
    /// Workers run as child processes, by default of the current executable.
    Process {
        #[serde(default)]
        program: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub worker_count: usize,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub launcher: LauncherConfig,
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    #[serde(default = "default_start_attempts")]
    pub start_attempts: u32,
}

impl ClusterConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

fn default_startup_timeout_ms() -> u64 {
    DEFAULT_STARTUP_TIMEOUT_MS
}

fn default_start_attempts() -> u32 {
    DEFAULT_START_ATTEMPTS
}
