//! Fuzz target for control channel requests.

#![no_main]

use std::sync::Arc;

use coverage_agent::bootstrap::{AgentState, StateCell};
use coverage_agent::control::{ControlHandler, DEFAULT_MAX_FRAME_SIZE};
use coverage_agent::telemetry::TransformStats;
use coverage_agent::TargetFilter;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(filter) = TargetFilter::new("com.acme") else { return };
    let handler = ControlHandler::new(
        Arc::new(filter),
        Arc::new(TransformStats::new()),
        Arc::new(StateCell::new(AgentState::Active)),
        DEFAULT_MAX_FRAME_SIZE,
    );
    // A response must always be encodable.
    assert!(handler.process(data).is_ok());
});
