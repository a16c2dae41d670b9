use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Deserialize, frame};

/// Reading half of a framed link.
pub struct FrameReceiver<R> {
    rx: R,
    body: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub(crate) fn new(rx: R) -> Self {
        Self {
            rx,
            body: Vec::new(),
        }
    }

    /// Waits for the next frame and parses its body.
    ///
    /// # Returns
    /// The message, `UnexpectedEof` if the peer went away mid frame or before it,
    /// `InvalidData` for an oversized or unparsable frame.
    pub async fn recv<T: Deserialize>(&mut self) -> io::Result<T> {
        let mut prefix = [0; frame::PREFIX_LEN];
        self.rx.read_exact(&mut prefix).await?;
        let len = frame::decode_len(prefix)?;

        self.body.resize(len, 0);
        self.rx.read_exact(&mut self.body).await?;
        T::deserialize(&self.body)
    }
}
