//! Length-prefixed message framing between the head and its workers.

mod frame;
pub mod msg;
mod receiver;
mod sender;
mod serialize;

use tokio::io::{AsyncRead, AsyncWrite};

pub use frame::MAX_FRAME_LEN;
pub use receiver::FrameReceiver;
pub use sender::FrameSender;
pub use serialize::{Deserialize, Serialize};

/// Wraps the two halves of a byte stream into a framed link.
///
/// # Arguments
/// * `rx` - The reading half.
/// * `tx` - The writing half.
///
/// # Returns
/// The receiving and sending ends.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
