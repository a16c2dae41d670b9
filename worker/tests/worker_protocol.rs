use std::{num::NonZeroUsize, sync::Arc};

use comms::{
    FrameReceiver, FrameSender,
    msg::{Command, Msg, Payload},
};
use model::{
    Dataset, Network,
    config::{ActFnConfig, DatasetConfig, LayerConfig, ModelConfig},
};
use tokio::io::{self, DuplexStream, ReadHalf, WriteHalf};
use worker::{WorkerBuilder, WorkerErr, WorkerSpec};

type Channel = (
    FrameReceiver<ReadHalf<DuplexStream>>,
    FrameSender<WriteHalf<DuplexStream>>,
);

fn channel_pair() -> (Channel, Channel) {
    let (stream1, stream2) = io::duplex(4096);
    let (rx1, tx1) = io::split(stream1);
    let (rx2, tx2) = io::split(stream2);
    (comms::channel(rx1, tx1), comms::channel(rx2, tx2))
}

fn spec() -> WorkerSpec {
    WorkerSpec {
        model: ModelConfig {
            layers: vec![
                LayerConfig {
                    input: 2,
                    output: 3,
                    activation: Some(ActFnConfig::Sigmoid),
                },
                LayerConfig {
                    input: 3,
                    output: 1,
                    activation: None,
                },
            ],
        },
        dataset: DatasetConfig::Inline {
            data: (0..24).map(|i| (i % 7) as f32 * 0.25).collect(),
            x_size: 2,
            y_size: 1,
        },
        batch_size: NonZeroUsize::new(3).unwrap(),
        worker_count: NonZeroUsize::new(2).unwrap(),
    }
}

#[tokio::test]
async fn test_answers_each_snapshot_with_its_update() {
    let spec = spec();
    let ((head_rx, head_tx), (mut rx, mut tx)) = channel_pair();

    let mut worker = WorkerBuilder::build(1, &spec).unwrap();
    let handle = tokio::spawn(async move { worker.run(head_rx, head_tx).await });

    let msg: Msg = rx.recv().await.unwrap();
    assert_eq!(msg, Msg::Control(Command::Register { worker_id: 1 }));

    let network = Network::new(&spec.model).unwrap();
    let shard = Dataset::load(&spec.dataset)
        .unwrap()
        .shard(1, spec.worker_count)
        .unwrap();

    for round in 0..3u64 {
        let params: Arc<[f32]> = network.init_params(round).unwrap().into();
        let snapshot = Msg::Data(Payload::Snapshot {
            round,
            step: round,
            params: params.clone(),
        });
        tx.send(&snapshot).await.unwrap();

        let expected = network
            .local_update(&params, &shard, spec.batch_size)
            .unwrap();

        match rx.recv::<Msg>().await.unwrap() {
            Msg::Data(Payload::Update {
                round: r,
                samples,
                loss,
                grad,
            }) => {
                assert_eq!(r, round);
                assert_eq!(samples, 4);
                assert_eq!(loss, expected.loss);
                assert_eq!(grad, expected.grad);
            }
            other => panic!("expected update, got {}", other.kind()),
        }
    }

    tx.send(&Msg::Control(Command::Disconnect)).await.unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reports_bad_snapshot_to_head() {
    let ((head_rx, head_tx), (mut rx, mut tx)) = channel_pair();

    let mut worker = WorkerBuilder::build(0, &spec()).unwrap();
    let handle = tokio::spawn(async move { worker.run(head_rx, head_tx).await });

    let _register: Msg = rx.recv().await.unwrap();

    let snapshot = Msg::Data(Payload::Snapshot {
        round: 0,
        step: 0,
        params: Arc::from(vec![0.0; 3]),
    });
    tx.send(&snapshot).await.unwrap();

    let msg: Msg = rx.recv().await.unwrap();
    assert!(matches!(msg, Msg::Err(_)));
    assert!(matches!(handle.await.unwrap(), Err(WorkerErr::Model(_))));
}

#[tokio::test]
async fn test_head_error_stops_worker() {
    let ((head_rx, head_tx), (mut rx, mut tx)) = channel_pair();

    let mut worker = WorkerBuilder::build(0, &spec()).unwrap();
    let handle = tokio::spawn(async move { worker.run(head_rx, head_tx).await });

    let _register: Msg = rx.recv().await.unwrap();
    tx.send(&Msg::Err("session aborted".into())).await.unwrap();

    match handle.await.unwrap() {
        Err(WorkerErr::Rejected(detail)) => assert_eq!(detail, "session aborted"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unexpected_message_is_a_protocol_error() {
    let ((head_rx, head_tx), (mut rx, mut tx)) = channel_pair();

    let mut worker = WorkerBuilder::build(0, &spec()).unwrap();
    let handle = tokio::spawn(async move { worker.run(head_rx, head_tx).await });

    let _register: Msg = rx.recv().await.unwrap();
    tx.send(&Msg::Control(Command::Register { worker_id: 7 }))
        .await
        .unwrap();

    assert!(matches!(
        handle.await.unwrap(),
        Err(WorkerErr::UnexpectedMessage { round: 0, .. })
    ));
}

#[tokio::test]
async fn test_head_hanging_up_is_an_io_error() {
    let ((head_rx, head_tx), (mut rx, tx)) = channel_pair();

    let mut worker = WorkerBuilder::build(0, &spec()).unwrap();
    let handle = tokio::spawn(async move { worker.run(head_rx, head_tx).await });

    let _register: Msg = rx.recv().await.unwrap();
    drop(tx);
    drop(rx);

    assert!(matches!(handle.await.unwrap(), Err(WorkerErr::Io(_))));
}
