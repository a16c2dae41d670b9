use std::num::NonZeroUsize;

use comms::{
    FrameReceiver, FrameSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info, warn};
use model::{Dataset, Network};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{Result, WorkerErr};

/// Turns parameter snapshots into local updates computed on a fixed data shard.
pub struct Worker {
    worker_id: usize,
    network: Network,
    shard: Dataset,
    batch_size: NonZeroUsize,
}

impl Worker {
    /// Creates a new `Worker`.
    ///
    /// # Arguments
    /// * `worker_id` - The id the head knows this worker by.
    /// * `network` - The model to compute updates with.
    /// * `shard` - The worker's part of the dataset.
    /// * `batch_size` - The maximum amount of records per mini-batch.
    pub fn new(worker_id: usize, network: Network, shard: Dataset, batch_size: NonZeroUsize) -> Self {
        Self {
            worker_id,
            network,
            shard,
            batch_size,
        }
    }

    pub fn id(&self) -> usize {
        self.worker_id
    }

    /// The amount of records in this worker's shard.
    pub fn shard_len(&self) -> usize {
        self.shard.len()
    }

    /// Registers with the head and answers every snapshot with an update until told to stop.
    ///
    /// # Arguments
    /// * `rx` - Receiving end of the head channel.
    /// * `tx` - Sending end of the head channel.
    ///
    /// # Returns
    /// `Ok(())` once the head sends a disconnect.
    ///
    /// # Errors
    /// Returns `WorkerErr` on I/O failures, protocol violations or when the
    /// update can't be computed, the latter being reported to the head first.
    pub async fn run<R, W>(&mut self, mut rx: FrameReceiver<R>, mut tx: FrameSender<W>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let worker_id = self.worker_id;
        let mut round = 0;

        tx.send(&Msg::Control(Command::Register { worker_id }))
            .await?;
        debug!(worker_id = worker_id; "registered with head");

        loop {
            match rx.recv::<Msg>().await? {
                Msg::Data(Payload::Snapshot {
                    round: r,
                    step,
                    params,
                }) => {
                    round = r;
                    debug!(worker_id = worker_id, round = round, step = step; "received snapshot");

                    let update = match self
                        .network
                        .local_update(&params, &self.shard, self.batch_size)
                    {
                        Ok(update) => update,
                        Err(e) => {
                            warn!(worker_id = worker_id, round = round; "cannot compute update: {e}");
                            tx.send(&Msg::Err(e.to_string())).await?;
                            return Err(e.into());
                        }
                    };

                    let msg = Msg::Data(Payload::Update {
                        round,
                        samples: update.samples,
                        loss: update.loss,
                        grad: update.grad,
                    });
                    tx.send(&msg).await?;
                }
                Msg::Control(Command::Disconnect) => {
                    info!("disconnect received from head: worker_id={worker_id} round={round}");
                    break;
                }
                Msg::Err(detail) => {
                    warn!("head reported an error: worker_id={worker_id} detail={detail}");
                    return Err(WorkerErr::Rejected(detail));
                }
                other => {
                    warn!(
                        "unexpected message from head: worker_id={} round={} got={}",
                        worker_id,
                        round,
                        other.kind()
                    );

                    return Err(WorkerErr::UnexpectedMessage {
                        round,
                        got: other.kind(),
                    });
                }
            }
        }

        Ok(())
    }
}
