mod common;

use common::{config, replay};
use std::io;

use orchestrator::{
    WorkerFailure,
    cluster::{TcpPool, WorkerPool},
    configs::LauncherConfig,
    start_cluster,
    status::{SessionState, WorkerState},
    train_distributed,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_in_process_cluster_trains_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("weights.safetensors");
    let config = config(3, 4, &artifact);

    let bundle = train_distributed(&config, &CancellationToken::new())
        .await
        .unwrap();

    let all = vec![0, 1, 2];
    let expected = replay(&config, &vec![all; 4]);
    let restored = weights::restore(&bundle, expected.layout().clone()).unwrap();
    assert_eq!(restored.values(), expected.values());

    let persisted = weights::load(&artifact).unwrap();
    assert_eq!(persisted, bundle);
    assert_eq!(persisted.provenance().producer, weights::Producer::Distributed);
    assert_eq!(persisted.provenance().config_hash, config.config_hash());
}

#[tokio::test]
async fn test_started_cluster_registers_every_worker() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(2, 1, &dir.path().join("weights.safetensors"));

    let mut session = start_cluster(&config).await.unwrap();

    assert_eq!(session.active_ids(), [0, 1]);
    assert!(
        session
            .statuses()
            .iter()
            .all(|s| s.state() == WorkerState::Ready)
    );

    session.shutdown().await;
    assert_eq!(session.state(), SessionState::Aborted);
}

#[tokio::test]
async fn test_missing_worker_program_fails_cluster_start() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("weights.safetensors");
    let mut config = config(2, 1, &artifact);
    config.cluster.launcher = LauncherConfig::Process {
        program: Some(dir.path().join("no-such-worker")),
    };

    let err = train_distributed(&config, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "ClusterStartError");
    assert!(!artifact.exists());
}

#[tokio::test]
async fn test_silent_worker_times_out_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(1, 1, &dir.path().join("weights.safetensors"));
    config.cluster.launcher = LauncherConfig::Process {
        program: Some("true".into()),
    };
    config.cluster.startup_timeout_ms = 200;
    config.cluster.start_attempts = 1;

    let err = start_cluster(&config).await.err().unwrap();
    assert_eq!(err.kind(), "ClusterStartError");
    assert!(err.to_string().contains("timed out"), "{err}");
}

#[tokio::test]
async fn test_shutdown_closes_the_head_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(1, 1, &dir.path().join("weights.safetensors"));

    let mut session = start_cluster(&config).await.unwrap();
    let head_addr = session.pool().head_addr();
    session.shutdown().await;

    let err = TcpStream::connect(head_addr).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
}

#[tokio::test]
async fn test_closed_pool_refuses_to_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(1, 1, &dir.path().join("weights.safetensors"));

    let mut pool = TcpPool::bind(&config).await.unwrap();
    pool.shutdown().await;

    match pool.spawn(0).await {
        Err(WorkerFailure::Launch(detail)) => assert!(detail.contains("closed"), "{detail}"),
        Err(other) => panic!("expected a launch failure, got {other}"),
        Ok(_) => panic!("spawned a worker on a closed pool"),
    }
}

#[tokio::test]
async fn test_taken_head_address_fails_cluster_start() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("weights.safetensors");
    let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let mut config = config(1, 1, &artifact);
    config.cluster.bind_addr = holder.local_addr().unwrap().to_string();
    config.cluster.start_attempts = 2;

    let err = train_distributed(&config, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "ClusterStartError");
    assert!(err.to_string().contains("after 2 attempts"), "{err}");
    assert!(!artifact.exists());
}
