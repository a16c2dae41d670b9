use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use comms::{
    FrameReceiver, FrameSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info, warn};
use tokio::{
    net::{
        TcpListener,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::{self, Instant},
};

use super::{LaunchGuard, Launcher, Report, Snapshot, WorkerLink, WorkerPool};
use crate::{OrchestratorError, WorkerFailure, configs::TrainingConfig};

type NetRx = FrameReceiver<OwnedReadHalf>;
type NetTx = FrameSender<OwnedWriteHalf>;

const BIND_BACKOFF: Duration = Duration::from_millis(100);
const RELEASE_GRACE: Duration = Duration::from_secs(2);

/// Workers connecting over TCP to the head's coordination endpoint.
pub struct TcpPool {
    /// Taken on shutdown, which closes the endpoint.
    listener: Option<TcpListener>,
    head_addr: SocketAddr,
    launcher: Launcher,
    startup_timeout: Duration,
}

impl TcpPool {
    /// Binds the head's coordination endpoint, retrying up to the configured attempts.
    ///
    /// # Arguments
    /// * `config` - The run's config.
    ///
    /// # Returns
    /// A new `TcpPool` or a `ClusterStart` error if the endpoint can't be bound.
    pub async fn bind(config: &TrainingConfig) -> Result<Self, OrchestratorError> {
        let cluster = &config.cluster;
        let attempts = cluster.start_attempts.max(1);
        let mut attempt = 1;

        let listener = loop {
            match TcpListener::bind(&cluster.bind_addr).await {
                Ok(listener) => break listener,
                Err(e) if attempt < attempts => {
                    warn!(attempt = attempt; "cannot bind {}: {e}", cluster.bind_addr);
                    time::sleep(BIND_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(OrchestratorError::ClusterStart(format!(
                        "cannot bind {} after {attempts} attempts: {e}",
                        cluster.bind_addr
                    )));
                }
            }
        };

        let mut head_addr = listener.local_addr()?;
        if head_addr.ip().is_unspecified() {
            head_addr.set_ip(Ipv4Addr::LOCALHOST.into());
        }

        info!("head listening at {head_addr}");

        Ok(Self {
            listener: Some(listener),
            head_addr,
            launcher: Launcher::new(config)?,
            startup_timeout: cluster.startup_timeout(),
        })
    }

    /// The address workers connect to.
    pub fn head_addr(&self) -> SocketAddr {
        self.head_addr
    }
}

impl WorkerPool for TcpPool {
    type Link = TcpLink;

    async fn spawn(&mut self, worker_id: usize) -> Result<TcpLink, WorkerFailure> {
        let Some(listener) = self.listener.as_ref() else {
            return Err(WorkerFailure::Launch(format!(
                "head endpoint {} is closed",
                self.head_addr
            )));
        };

        let guard = self.launcher.launch(worker_id, self.head_addr)?;
        let deadline = Instant::now() + self.startup_timeout;

        loop {
            let (stream, peer) = time::timeout_at(deadline, listener.accept())
                .await
                .map_err(|_| WorkerFailure::Timeout)?
                .map_err(WorkerFailure::Disconnected)?;

            let _ = stream.set_nodelay(true);
            let (rx, tx) = stream.into_split();
            let (mut rx, tx) = comms::channel(rx, tx);

            match time::timeout_at(deadline, rx.recv::<Msg>()).await {
                Err(_) => return Err(WorkerFailure::Timeout),
                Ok(Ok(Msg::Control(Command::Register { worker_id: id }))) if id == worker_id => {
                    debug!(worker_id = worker_id, peer:% = peer; "worker registered");
                    return Ok(TcpLink {
                        worker_id,
                        rx,
                        tx,
                        guard,
                    });
                }
                Ok(Ok(msg)) => warn!(
                    "dropping connection from {peer}: expected registration of worker {worker_id}, got {}",
                    msg.kind()
                ),
                Ok(Err(e)) => warn!("dropping connection from {peer}: {e}"),
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.listener.take().is_some() {
            debug!("closed head endpoint {}", self.head_addr);
        }
    }
}

/// A registered worker connected over TCP.
pub struct TcpLink {
    worker_id: usize,
    rx: NetRx,
    tx: NetTx,
    guard: LaunchGuard,
}

impl WorkerLink for TcpLink {
    async fn exchange(&mut self, snapshot: &Snapshot) -> Result<Report, WorkerFailure> {
        let msg = Msg::Data(Payload::Snapshot {
            round: snapshot.round,
            step: snapshot.step,
            params: snapshot.params.clone(),
        });
        self.tx
            .send(&msg)
            .await
            .map_err(WorkerFailure::Disconnected)?;

        match self.rx.recv::<Msg>().await.map_err(WorkerFailure::Disconnected)? {
            Msg::Data(Payload::Update {
                round,
                samples,
                loss,
                grad,
            }) if round == snapshot.round => Ok(Report {
                samples,
                loss,
                grad,
            }),
            Msg::Data(Payload::Update { round, .. }) => Err(WorkerFailure::Protocol(format!(
                "update for round {round} while waiting for round {}",
                snapshot.round
            ))),
            Msg::Err(detail) => Err(WorkerFailure::Reported(detail)),
            other => Err(WorkerFailure::Protocol(format!(
                "expected an update, got {}",
                other.kind()
            ))),
        }
    }

    async fn release(&mut self) {
        let msg = Msg::Control(Command::Disconnect);
        if let Err(e) = self.tx.send(&msg).await {
            debug!(worker_id = self.worker_id; "cannot send disconnect: {e}");
        }
        let _ = self.tx.close().await;

        self.guard.finish(RELEASE_GRACE).await;
    }
}
