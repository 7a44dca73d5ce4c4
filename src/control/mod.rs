//! Remote control channel.
//!
//! Optional TCP listener that replaces the target prefixes of a running
//! agent. Failed commands are answered with an error message and leave the
//! active prefix set untouched.

mod client;
mod connections;
mod handler;
mod protocol;
mod server;

pub use client::{ClientError, ControlClient};
pub use connections::{ConnectionConfig, ConnectionGuard, ConnectionPool, OwnedConnectionGuard};
pub use handler::{ControlHandler, HandlerError};
pub use protocol::{
    codes, decode_message, encode_message, read_frame, write_frame, AgentStatus, ControlMessage,
    ProtocolError, DEFAULT_MAX_FRAME_SIZE,
};
pub use server::{spawn, ControlHandle, ControlServerConfig, ServerError};
