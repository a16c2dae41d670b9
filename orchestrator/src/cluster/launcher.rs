use std::{
    env,
    io::Write,
    net::SocketAddr,
    path::PathBuf,
    process::Stdio,
    time::Duration,
};

use log::{debug, info, warn};
use tempfile::NamedTempFile;
use tokio::{
    process::{Child, Command},
    task::JoinHandle,
    time,
};
use worker::WorkerSpec;

use crate::{
    OrchestratorError, WorkerFailure,
    configs::{LauncherConfig, ResourcesConfig, TrainingConfig},
};

/// Starts workers that connect back to the head.
pub struct Launcher {
    kind: Kind,
    spec: WorkerSpec,
    resources: ResourcesConfig,
}

enum Kind {
    InProcess,
    Process {
        program: PathBuf,
        /// A copy of the run's config for child workers, removed when dropped.
        config: NamedTempFile,
    },
}

/// Writes `config` to a uniquely named file child workers can load.
fn share_config(config: &TrainingConfig) -> Result<NamedTempFile, OrchestratorError> {
    let cannot_write = |e: std::io::Error| {
        OrchestratorError::ClusterStart(format!("cannot write worker config: {e}"))
    };

    let json = serde_json::to_vec(config)
        .map_err(|e| OrchestratorError::ClusterStart(e.to_string()))?;

    let mut file = tempfile::Builder::new()
        .prefix("orchestra-")
        .suffix(".json")
        .tempfile()
        .map_err(cannot_write)?;
    file.write_all(&json).map_err(cannot_write)?;
    file.flush().map_err(cannot_write)?;

    Ok(file)
}

impl Launcher {
    /// Creates a new `Launcher` for the configured launcher kind.
    ///
    /// # Arguments
    /// * `config` - The run's config, child workers load the very same one.
    ///
    /// # Returns
    /// A `ClusterStart` error if the worker program can't be found or the config can't be shared.
    pub fn new(config: &TrainingConfig) -> Result<Self, OrchestratorError> {
        let kind = match &config.cluster.launcher {
            LauncherConfig::InProcess => Kind::InProcess,
            LauncherConfig::Process { program } => {
                let program = match program {
                    Some(program) => program.clone(),
                    None => env::current_exe().map_err(|e| {
                        OrchestratorError::ClusterStart(format!("cannot locate worker program: {e}"))
                    })?,
                };

                Kind::Process {
                    program,
                    config: share_config(config)?,
                }
            }
        };

        let resources = &config.cluster.resources;
        info!(
            cpus:? = resources.cpus,
            memory_mb:? = resources.memory_mb;
            "per worker resources"
        );

        Ok(Self {
            kind,
            spec: config.worker_spec(),
            resources: resources.clone(),
        })
    }

    /// Launches worker `worker_id`, pointing it at `head_addr`.
    pub fn launch(&self, worker_id: usize, head_addr: SocketAddr) -> Result<LaunchGuard, WorkerFailure> {
        match &self.kind {
            Kind::InProcess => {
                let spec = self.spec.clone();
                let handle = tokio::spawn(async move {
                    if let Err(e) = worker::join(head_addr, worker_id, &spec).await {
                        warn!(worker_id = worker_id; "worker stopped: {e}");
                    }
                });

                debug!(worker_id = worker_id; "launched worker task");
                Ok(LaunchGuard::Task(handle))
            }
            Kind::Process { program, config } => {
                let mut command = Command::new(program);
                command
                    .env("APP_MODE", "train_distributed")
                    .env("CLUSTER_ROLE", "worker")
                    .env("HEAD_ADDR", head_addr.to_string())
                    .env("WORKER_ID", worker_id.to_string())
                    .env("CONFIG_PATH", config.path())
                    .stdin(Stdio::null());

                if let Some(cpus) = self.resources.cpus {
                    command.env("WORKER_CPUS", cpus.to_string());
                }
                if let Some(memory_mb) = self.resources.memory_mb {
                    command.env("WORKER_MEMORY_MB", memory_mb.to_string());
                }

                let child = command
                    .spawn()
                    .map_err(|e| WorkerFailure::Launch(format!("{}: {e}", program.display())))?;

                debug!(worker_id = worker_id, pid:? = child.id(); "launched worker process");
                Ok(LaunchGuard::Child(child))
            }
        }
    }
}

/// Owns a launched worker, killing it when dropped.
pub enum LaunchGuard {
    Task(JoinHandle<()>),
    Child(Child),
}

impl LaunchGuard {
    /// Waits up to `grace` for the worker to exit on its own, then kills it.
    pub async fn finish(&mut self, grace: Duration) {
        match self {
            Self::Task(handle) => {
                if time::timeout(grace, &mut *handle).await.is_err() {
                    handle.abort();
                }
            }
            Self::Child(child) => {
                if time::timeout(grace, child.wait()).await.is_err() {
                    let _ = child.kill().await;
                }
            }
        }
    }
}

impl Drop for LaunchGuard {
    fn drop(&mut self) {
        match self {
            Self::Task(handle) => handle.abort(),
            Self::Child(child) => {
                let _ = child.start_kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn process_config() -> TrainingConfig {
        let json = serde_json::json!({
            "cluster": { "worker_count": 1, "launcher": { "kind": "process", "program": "true" } },
            "training": { "rounds": 1 },
            "model": { "layers": [{ "input": 1, "output": 1 }] },
            "dataset": { "kind": "inline", "data": [1.0, 2.0], "x_size": 1, "y_size": 1 },
            "output": { "artifact_path": "weights.safetensors" }
        });
        TrainingConfig::from_json(&json.to_string()).unwrap()
    }

    fn shared_path(launcher: &Launcher) -> &Path {
        match &launcher.kind {
            Kind::Process { config, .. } => config.path(),
            Kind::InProcess => panic!("expected a process launcher"),
        }
    }

    #[test]
    fn test_launchers_of_one_config_keep_separate_files() {
        let config = process_config();
        let first = Launcher::new(&config).unwrap();
        let second = Launcher::new(&config).unwrap();

        let first_path = shared_path(&first).to_path_buf();
        let second_path = shared_path(&second).to_path_buf();
        assert_ne!(first_path, second_path);

        drop(first);
        assert!(!first_path.exists());

        let shared = TrainingConfig::load(&second_path).unwrap();
        assert_eq!(shared, config);
    }
}
