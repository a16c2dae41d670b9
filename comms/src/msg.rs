use std::{io, sync::Arc};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();
const WORD_SIZE: usize = size_of::<u64>();
const FLOAT_SIZE: usize = size_of::<f32>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;
const SNAPSHOT_H: Header = 2;
const UPDATE_H: Header = 3;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The head's broadcast of the authoritative parameters for a round.
    Snapshot {
        round: u64,
        step: u64,
        params: Arc<[f32]>,
    },
    /// A worker's local update computed against its shard.
    Update {
        round: u64,
        samples: u64,
        loss: f32,
        grad: Vec<f32>,
    },
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Register { worker_id: usize },
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    Control(Command),
    Data(Payload),
    Err(String),
}

impl Msg {
    /// A short name of the message kind, for logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Register { .. }) => "control/register",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Snapshot { .. }) => "data/snapshot",
            Msg::Data(Payload::Update { .. }) => "data/update",
            Msg::Err(_) => "err",
        }
    }

    fn invalid<T>(detail: impl Into<String>) -> io::Result<T> {
        Err(io::Error::new(io::ErrorKind::InvalidData, detail.into()))
    }
}

impl Serialize for Msg {
    fn serialize<'a>(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_H.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_H.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(Payload::Snapshot {
                round,
                step,
                params,
            }) => {
                buf.extend_from_slice(&SNAPSHOT_H.to_be_bytes());
                buf.extend_from_slice(&round.to_be_bytes());
                buf.extend_from_slice(&step.to_be_bytes());
                Some(bytemuck::cast_slice(&params[..]))
            }
            Msg::Data(Payload::Update {
                round,
                samples,
                loss,
                grad,
            }) => {
                buf.extend_from_slice(&UPDATE_H.to_be_bytes());
                buf.extend_from_slice(&round.to_be_bytes());
                buf.extend_from_slice(&samples.to_be_bytes());
                buf.extend_from_slice(&loss.to_ne_bytes());
                Some(bytemuck::cast_slice(&grad[..]))
            }
        }
    }
}

impl Deserialize for Msg {
    fn deserialize(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::invalid(format!(
                "The given buffer is too small {}, must at least be {HEADER_SIZE} bytes",
                buf.len()
            ));
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);
        let kind = Header::from_be_bytes([kind_buf[0], kind_buf[1], kind_buf[2], kind_buf[3]]);

        match kind {
            ERR_H => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(string.to_owned()))
            }
            CONTROL_H => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            SNAPSHOT_H => {
                let mut cursor = Cursor::new(rest);
                let round = cursor.word()?;
                let step = cursor.word()?;
                let params = cursor.floats()?;

                Ok(Self::Data(Payload::Snapshot {
                    round,
                    step,
                    params: params.into(),
                }))
            }
            UPDATE_H => {
                let mut cursor = Cursor::new(rest);
                let round = cursor.word()?;
                let samples = cursor.word()?;
                let loss = cursor.float()?;
                let grad = cursor.floats()?;

                Ok(Self::Data(Payload::Update {
                    round,
                    samples,
                    loss,
                    grad,
                }))
            }
            other => Self::invalid(format!("Received an invalid kind header {other}")),
        }
    }
}

/// Sequential reader over a frame body.
struct Cursor<'a> {
    rest: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(rest: &'a [u8]) -> Self {
        Self { rest }
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.rest.len() < n {
            return Msg::invalid(format!(
                "truncated data frame, needed {n} more bytes but got {}",
                self.rest.len()
            ));
        }

        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }

    fn word(&mut self) -> io::Result<u64> {
        let mut bytes = [0; WORD_SIZE];
        bytes.copy_from_slice(self.take(WORD_SIZE)?);
        Ok(u64::from_be_bytes(bytes))
    }

    fn float(&mut self) -> io::Result<f32> {
        let mut bytes = [0; FLOAT_SIZE];
        bytes.copy_from_slice(self.take(FLOAT_SIZE)?);
        Ok(f32::from_ne_bytes(bytes))
    }

    /// Consumes the remaining bytes as a list of floats.
    fn floats(&mut self) -> io::Result<Vec<f32>> {
        if self.rest.len() % FLOAT_SIZE != 0 {
            return Msg::invalid(format!(
                "float payload of {} bytes is not a multiple of {FLOAT_SIZE}",
                self.rest.len()
            ));
        }

        let nums = self
            .rest
            .chunks_exact(FLOAT_SIZE)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        self.rest = &[];
        Ok(nums)
    }
}
