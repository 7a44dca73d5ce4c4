//! Client side of the control channel, used by the CLI.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpStream;

use super::protocol::{
    decode_message, encode_message, read_frame, write_frame, AgentStatus, ControlMessage,
    ProtocolError, DEFAULT_MAX_FRAME_SIZE,
};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("agent rejected request ({code}): {message}")]
    Rejected { code: u32, message: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

#[derive(Debug, Clone)]
pub struct ControlClient {
    addr: SocketAddr,
    max_frame_size: usize,
}

impl ControlClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// One exchange on a fresh connection. Error replies come back as
    /// `Ok(ControlMessage::Error { .. })`.
    pub async fn send(&self, message: &ControlMessage) -> Result<ControlMessage, ClientError> {
        let mut stream = TcpStream::connect(self.addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: self.addr,
                source,
            })?;
        let request = encode_message(message, self.max_frame_size)?;
        write_frame(&mut stream, &request).await?;
        let response = read_frame(&mut stream, self.max_frame_size).await?;
        Ok(decode_message(&response, self.max_frame_size)?)
    }

    /// Replace the agent's prefixes; returns the applied set and generation.
    pub async fn set_prefixes(&self, prefixes: &str) -> Result<(Vec<String>, u64), ClientError> {
        let reply = self
            .send(&ControlMessage::SetPrefixes {
                prefixes: prefixes.to_string(),
            })
            .await?;
        expect_prefixes(reply)
    }

    pub async fn get_prefixes(&self) -> Result<(Vec<String>, u64), ClientError> {
        expect_prefixes(self.send(&ControlMessage::GetPrefixes).await?)
    }

    pub async fn status(&self) -> Result<AgentStatus, ClientError> {
        match self.send(&ControlMessage::StatusRequest).await? {
            ControlMessage::Status(status) => Ok(status),
            ControlMessage::Error { code, message } => Err(ClientError::Rejected { code, message }),
            other => Err(ClientError::UnexpectedResponse(format!("{:?}", other))),
        }
    }
}

fn expect_prefixes(reply: ControlMessage) -> Result<(Vec<String>, u64), ClientError> {
    match reply {
        ControlMessage::Prefixes {
            prefixes,
            generation,
        } => Ok((prefixes, generation)),
        ControlMessage::Error { code, message } => Err(ClientError::Rejected { code, message }),
        other => Err(ClientError::UnexpectedResponse(format!("{:?}", other))),
    }
}
