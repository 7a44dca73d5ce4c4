//! End-to-end tests for the control channel over real TCP.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use coverage_agent::bootstrap::{AgentState, StateCell};
use coverage_agent::control::{
    self, codes, decode_message, read_frame, write_frame, ClientError, ConnectionConfig,
    ControlClient, ControlHandle, ControlHandler, ControlMessage, ControlServerConfig,
    DEFAULT_MAX_FRAME_SIZE,
};
use coverage_agent::telemetry::TransformStats;
use coverage_agent::TargetFilter;

fn start(max_connections: usize) -> (ControlHandle, Arc<TargetFilter>) {
    let filter = Arc::new(TargetFilter::new("com.acme").unwrap());
    let handler = Arc::new(ControlHandler::new(
        Arc::clone(&filter),
        Arc::new(TransformStats::new()),
        Arc::new(StateCell::new(AgentState::Active)),
        DEFAULT_MAX_FRAME_SIZE,
    ));
    let config = ControlServerConfig::new("127.0.0.1:0".parse().unwrap());
    let handle = control::spawn(&config, ConnectionConfig { max_connections }, handler).unwrap();
    (handle, filter)
}

async fn raw_exchange(addr: SocketAddr, body: &[u8]) -> ControlMessage {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut stream, body).await.unwrap();
    let reply = read_frame(&mut stream, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
    decode_message(&reply, DEFAULT_MAX_FRAME_SIZE).unwrap()
}

#[tokio::test]
async fn test_set_prefixes_replaces_active_set() {
    let (handle, filter) = start(4);
    let client = ControlClient::new(handle.local_addr());

    let (prefixes, generation) = client.set_prefixes("org.shop, org.cart").await.unwrap();
    assert_eq!(prefixes, vec!["org.shop".to_string(), "org.cart".to_string()]);
    assert_eq!(generation, 1);
    assert_eq!(filter.snapshot().as_slice(), prefixes.as_slice());

    let (current, _) = client.get_prefixes().await.unwrap();
    assert_eq!(current, prefixes);
    handle.shutdown();
}

#[tokio::test]
async fn test_empty_prefixes_rejected() {
    let (handle, filter) = start(4);
    let client = ControlClient::new(handle.local_addr());

    let err = client.set_prefixes(" , ").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Rejected {
            code: codes::INVALID_PREFIXES,
            ..
        }
    ));
    assert_eq!(filter.snapshot().as_slice(), &["com.acme".to_string()]);
    handle.shutdown();
}

#[tokio::test]
async fn test_malformed_payload_leaves_set_unchanged() {
    let (handle, filter) = start(4);
    let reply = raw_exchange(handle.local_addr(), b"{not json").await;
    assert!(matches!(
        reply,
        ControlMessage::Error {
            code: codes::BAD_REQUEST,
            ..
        }
    ));
    assert_eq!(filter.snapshot().as_slice(), &["com.acme".to_string()]);
    assert_eq!(filter.generation(), 0);
    handle.shutdown();
}

#[tokio::test]
async fn test_oversized_frame_rejected() {
    let (handle, _filter) = start(4);
    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    let declared = (DEFAULT_MAX_FRAME_SIZE as u32 + 1).to_le_bytes();
    stream.write_all(&declared).await.unwrap();

    let reply = read_frame(&mut stream, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
    let message = decode_message(&reply, DEFAULT_MAX_FRAME_SIZE).unwrap();
    assert!(matches!(
        message,
        ControlMessage::Error {
            code: codes::PAYLOAD_TOO_LARGE,
            ..
        }
    ));
    handle.shutdown();
}

#[tokio::test]
async fn test_status_reports_state() {
    let (handle, _filter) = start(4);
    let status = ControlClient::new(handle.local_addr()).status().await.unwrap();
    assert_eq!(status.state, AgentState::Active);
    assert_eq!(status.prefixes, vec!["com.acme".to_string()]);
    assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
    handle.shutdown();
}

#[tokio::test]
async fn test_connection_limit() {
    let (handle, _filter) = start(1);
    let addr = handle.local_addr();

    // Holds the only slot: connected, never sends a request.
    let _idle = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let reply = raw_exchange(addr, br#"{"type":"get_prefixes"}"#).await;
    assert!(matches!(
        reply,
        ControlMessage::Error {
            code: codes::UNAVAILABLE,
            ..
        }
    ));
    handle.shutdown();
}

#[tokio::test]
async fn test_unreachable_agent() {
    let (handle, _filter) = start(1);
    let addr = handle.local_addr();
    handle.shutdown();

    let err = ControlClient::new(addr).get_prefixes().await.unwrap_err();
    assert!(matches!(err, ClientError::Connect { .. }));
}
