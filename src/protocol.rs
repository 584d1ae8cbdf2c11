//! Wire protocol between the dispatcher and its builders.
//!
//! Each message is one length-prefixed JSON frame: a big-endian u32
//! byte count followed by the serialized payload. A submission is a
//! three-phase exchange driven by the dispatcher:
//!
//! 1. dispatcher sends the problem id; the builder answers whether it
//!    has that problem cached,
//! 2. if uncached, dispatcher sends the problem and its test cases,
//! 3. dispatcher sends the program text; the builder tests it and
//!    answers with the submission result.
//!
//! A negative problem id is a keepalive: the builder ignores it and
//! waits for the next frame.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::domain::{Problem, TestCase};

/// Sentinel problem id announcing "still here, nothing to test".
pub const KEEPALIVE_PROBLEM_ID: i32 = -1;

/// Upper bound on a single frame. Program text and captured test
/// output are both capped well below this; anything larger is a
/// corrupt or malicious peer.
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: u32, max: u32 },
}

impl ProtocolError {
    /// True when the peer closed the connection cleanly between frames.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof
        )
    }
}

/// Phase-2 payload: everything the builder must cache for a problem.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProblemAndTestCases {
    pub problem: Problem,
    pub test_cases: Vec<TestCase>,
}

/// Any duplex byte stream the protocol can run over (plain TCP or TLS).
pub trait WireStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> WireStream for T {}

pub type IoStream = Box<dyn WireStream>;

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_BYTES,
        });
    }
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_BYTES,
        });
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}
