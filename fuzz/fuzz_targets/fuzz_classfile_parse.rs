//! Fuzz target for class-file parsing and probe injection.
//!
//! Arbitrary bytes must only ever produce `Ok` or `Err`. Whatever parses
//! must also survive instrumentation without panicking.

#![no_main]

use std::sync::Arc;

use coverage_agent::{ExclusionPolicy, InstrumentationEngine, TargetFilter};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(filter) = TargetFilter::new("fuzz") else { return };
    let engine = InstrumentationEngine::new(Arc::new(filter), ExclusionPolicy::new());
    let _ = engine.transform("fuzz/Target", data);
});
