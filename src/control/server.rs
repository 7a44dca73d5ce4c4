//! Control channel listener.
//!
//! Runs on its own OS thread with a current-thread tokio runtime, so it never
//! competes with the host's class-loading threads and needs no runtime from
//! the host. Binding happens on the caller's thread; a bind failure is
//! reported from [`spawn`] rather than from the background thread.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connections::{ConnectionConfig, ConnectionPool};
use super::handler::{ControlHandler, HandlerError};
use super::protocol::{read_frame, write_frame, ProtocolError, DEFAULT_MAX_FRAME_SIZE};

/// How long a turned-away connection may take to send its request before
/// the rejection is written.
const REJECT_DRAIN: Duration = Duration::from_secs(1);

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlServerConfig {
    pub bind: SocketAddr,
    /// Largest accepted request frame body, in bytes.
    pub max_frame_size: usize,
}

impl ControlServerConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind control channel on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("failed to start control runtime: {0}")]
    Runtime(std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
}

/// Handle to a running listener. Dropping it stops the listener without
/// waiting; [`ControlHandle::shutdown`] also joins the thread.
#[derive(Debug)]
pub struct ControlHandle {
    addr: SocketAddr,
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl ControlHandle {
    /// Bound address; useful when the configured port was 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("control thread panicked");
            }
        }
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Bind and start serving on a background thread.
pub fn spawn(
    config: &ControlServerConfig,
    connections: ConnectionConfig,
    handler: Arc<ControlHandler>,
) -> Result<ControlHandle, ServerError> {
    let std_listener = std::net::TcpListener::bind(config.bind).map_err(|source| ServerError::Bind {
        addr: config.bind,
        source,
    })?;
    std_listener.set_nonblocking(true)?;
    let addr = std_listener.local_addr()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ServerError::Runtime)?;
    let listener = {
        let _enter = runtime.enter();
        TcpListener::from_std(std_listener)?
    };

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let pool = Arc::new(ConnectionPool::new(connections));
    let max_frame_size = config.max_frame_size;

    let thread = std::thread::Builder::new()
        .name("coverage-agent-control".into())
        .spawn(move || {
            runtime.block_on(serve(listener, handler, pool, token, max_frame_size));
        })
        .map_err(ServerError::Runtime)?;

    info!(%addr, "control channel listening");
    Ok(ControlHandle {
        addr,
        shutdown,
        thread: Some(thread),
    })
}

async fn serve(
    listener: TcpListener,
    handler: Arc<ControlHandler>,
    pool: Arc<ConnectionPool>,
    shutdown: CancellationToken,
    max_frame_size: usize,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "control accept failed");
                        continue;
                    }
                };
                let handler = Arc::clone(&handler);
                match pool.try_acquire_owned() {
                    Some(guard) => {
                        tokio::spawn(async move {
                            let _guard = guard;
                            if let Err(e) = handle_connection(stream, &handler, max_frame_size).await {
                                debug!(%peer, error = %e, "control connection ended with error");
                            }
                        });
                    }
                    None => {
                        warn!(%peer, limit = pool.max_connections(), "control connection rejected");
                        tokio::spawn(async move {
                            if let Err(e) = reject(stream, &handler, max_frame_size).await {
                                debug!(%peer, error = %e, "failed to send rejection");
                            }
                        });
                    }
                }
            }
        }
    }
    info!("control channel stopped");
}

async fn handle_connection(
    mut stream: TcpStream,
    handler: &ControlHandler,
    max_frame_size: usize,
) -> Result<(), ServerError> {
    let response = match read_frame(&mut stream, max_frame_size).await {
        Ok(request) => handler.process(&request)?,
        Err(ProtocolError::MessageTooLarge { size, .. }) => handler.too_large(size)?,
        Err(e) => return Err(e.into()),
    };
    write_frame(&mut stream, &response).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn reject(
    mut stream: TcpStream,
    handler: &ControlHandler,
    max_frame_size: usize,
) -> Result<(), ServerError> {
    // Consume the request so closing the socket does not reset it.
    let _ = tokio::time::timeout(REJECT_DRAIN, read_frame(&mut stream, max_frame_size)).await;
    let response = handler.unavailable()?;
    write_frame(&mut stream, &response).await?;
    stream.shutdown().await?;
    Ok(())
}
