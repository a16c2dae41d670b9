use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{Serialize, frame};

/// Writing half of a framed link.
pub struct FrameSender<W> {
    tx: W,
    scratch: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub(crate) fn new(tx: W) -> Self {
        Self {
            tx,
            scratch: Vec::new(),
        }
    }

    /// Writes `msg` as a single frame and flushes it.
    ///
    /// The owned part of the body goes out together with the prefix, the borrowed
    /// tail is written straight from `msg`.
    ///
    /// # Arguments
    /// * `msg` - The message to send.
    ///
    /// # Returns
    /// An `InvalidData` error if the body exceeds `MAX_FRAME_LEN`, or the write error.
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> io::Result<()> {
        self.scratch.clear();
        self.scratch.extend_from_slice(&[0; frame::PREFIX_LEN]);

        let tail = msg.serialize(&mut self.scratch).unwrap_or_default();
        let body_len = self.scratch.len() - frame::PREFIX_LEN + tail.len();
        self.scratch[..frame::PREFIX_LEN].copy_from_slice(&frame::encode_len(body_len)?);

        self.tx.write_all(&self.scratch).await?;
        if !tail.is_empty() {
            self.tx.write_all(tail).await?;
        }

        self.tx.flush().await
    }

    /// Shuts the writer down, the peer reads an end of stream next.
    pub async fn close(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}
