//! Request handling for control connections.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use super::protocol::{
    codes, decode_message, encode_message, AgentStatus, ControlMessage, ProtocolError,
};
use crate::bootstrap::StateCell;
use crate::filter::TargetFilter;
use crate::telemetry::{record_reconfiguration, TransformStats};

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Applies control commands to the shared target filter.
#[derive(Debug)]
pub struct ControlHandler {
    filter: Arc<TargetFilter>,
    stats: Arc<TransformStats>,
    state: Arc<StateCell>,
    max_frame_size: usize,
}

impl ControlHandler {
    pub fn new(
        filter: Arc<TargetFilter>,
        stats: Arc<TransformStats>,
        state: Arc<StateCell>,
        max_frame_size: usize,
    ) -> Self {
        Self {
            filter,
            stats,
            state,
            max_frame_size,
        }
    }

    /// Process one request frame and return the response frame body.
    ///
    /// Malformed or rejected requests produce an error message, not an `Err`;
    /// `Err` means the response itself could not be encoded.
    pub fn process(&self, bytes: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let response = match decode_message(bytes, self.max_frame_size) {
            Ok(message) => self.handle(message),
            Err(ProtocolError::MessageTooLarge { size, max }) => ControlMessage::error(
                codes::PAYLOAD_TOO_LARGE,
                format!("frame of {} bytes exceeds limit of {}", size, max),
            ),
            Err(e) => {
                warn!(error = %e, "malformed control request");
                ControlMessage::error(codes::BAD_REQUEST, e.to_string())
            }
        };
        match encode_message(&response, self.max_frame_size) {
            Err(ProtocolError::MessageTooLarge { size, .. }) => {
                warn!(size, "control response over frame limit");
                let fallback = ControlMessage::error(
                    codes::PAYLOAD_TOO_LARGE,
                    format!("response of {} bytes exceeds limit of {}", size, self.max_frame_size),
                );
                Ok(encode_message(&fallback, self.max_frame_size)?)
            }
            other => Ok(other?),
        }
    }

    /// Response for a frame whose declared length is over the limit.
    pub fn too_large(&self, size: usize) -> Result<Vec<u8>, HandlerError> {
        let response = ControlMessage::error(
            codes::PAYLOAD_TOO_LARGE,
            format!("frame of {} bytes exceeds limit of {}", size, self.max_frame_size),
        );
        Ok(encode_message(&response, self.max_frame_size)?)
    }

    /// Response for a connection turned away at the connection limit.
    pub fn unavailable(&self) -> Result<Vec<u8>, HandlerError> {
        let response = ControlMessage::error(codes::UNAVAILABLE, "connection limit reached");
        Ok(encode_message(&response, self.max_frame_size)?)
    }

    pub fn handle(&self, message: ControlMessage) -> ControlMessage {
        match message {
            ControlMessage::SetPrefixes { prefixes } => match self.filter.configure(&prefixes) {
                Ok(set) => {
                    record_reconfiguration(true);
                    info!(prefixes = ?set.as_slice(), "prefixes replaced over control channel");
                    ControlMessage::Prefixes {
                        prefixes: set.as_slice().to_vec(),
                        generation: self.filter.generation(),
                    }
                }
                Err(e) => {
                    record_reconfiguration(false);
                    warn!(error = %e, raw = %prefixes, "prefix update rejected");
                    ControlMessage::error(codes::INVALID_PREFIXES, e.to_string())
                }
            },

            ControlMessage::GetPrefixes => ControlMessage::Prefixes {
                prefixes: self.filter.snapshot().as_slice().to_vec(),
                generation: self.filter.generation(),
            },

            ControlMessage::StatusRequest => ControlMessage::Status(AgentStatus {
                state: self.state.get(),
                prefixes: self.filter.snapshot().as_slice().to_vec(),
                generation: self.filter.generation(),
                stats: self.stats.snapshot(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            }),

            _ => ControlMessage::error(codes::BAD_REQUEST, "Unexpected message type"),
        }
    }
}
