//! Wire format of the control channel.
//!
//! Each connection carries one exchange: the client writes one frame, the
//! agent answers with one frame and closes. A frame is a little-endian `u32`
//! length followed by a JSON message of that many bytes.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::bootstrap::AgentState;
use crate::telemetry::StatsSnapshot;

/// Default upper bound on a frame body.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Error codes carried by [`ControlMessage::Error`].
pub mod codes {
    /// Malformed frame or unexpected message type.
    pub const BAD_REQUEST: u32 = 400;
    pub const PAYLOAD_TOO_LARGE: u32 = 413;
    /// Prefix list rejected; the active set is unchanged.
    pub const INVALID_PREFIXES: u32 = 422;
    /// Connection limit reached.
    pub const UNAVAILABLE: u32 = 503;
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Agent state reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub state: AgentState,
    pub prefixes: Vec<String>,
    /// Successful reconfigurations since startup.
    pub generation: u64,
    pub stats: StatsSnapshot,
    pub version: String,
}

/// All control channel messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Replace the target prefixes with a comma-separated prefix list.
    #[serde(rename = "set_prefixes")]
    SetPrefixes { prefixes: String },

    #[serde(rename = "get_prefixes")]
    GetPrefixes,

    #[serde(rename = "status_request")]
    StatusRequest,

    /// Active prefix set; also the success reply to `set_prefixes`.
    #[serde(rename = "prefixes")]
    Prefixes { prefixes: Vec<String>, generation: u64 },

    #[serde(rename = "status")]
    Status(AgentStatus),

    #[serde(rename = "error")]
    Error { code: u32, message: String },
}

impl ControlMessage {
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        ControlMessage::Error {
            code,
            message: message.into(),
        }
    }
}

/// Encode a message to JSON, enforcing the frame limit.
pub fn encode_message(message: &ControlMessage, max: usize) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > max {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max,
        });
    }
    Ok(bytes)
}

/// Decode a JSON message. The size is checked before parsing.
pub fn decode_message(bytes: &[u8], max: usize) -> Result<ControlMessage, ProtocolError> {
    if bytes.len() > max {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max,
        });
    }
    Ok(serde_json::from_slice(bytes)?)
}

pub async fn write_frame<W>(w: &mut W, data: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(data.len()).map_err(|_| ProtocolError::MessageTooLarge {
        size: data.len(),
        max: u32::MAX as usize,
    })?;
    w.write_all(&len.to_le_bytes()).await?;
    w.write_all(data).await?;
    w.flush().await?;
    Ok(())
}

/// Read one frame. A declared length above `max` is rejected before the body
/// is read.
pub async fn read_frame<R>(r: &mut R, max: usize) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max {
        return Err(ProtocolError::MessageTooLarge { size: len, max });
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}
