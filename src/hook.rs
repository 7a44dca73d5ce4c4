//! Load-hook adapter.
//!
//! The host calls [`LoadHook::on_load`] once per class load, synchronously and
//! from any number of threads. Nothing that goes wrong inside the engine may
//! reach the host: errors and panics both degrade to returning the original
//! bytes, which costs coverage for that class and nothing else.

use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::instrument::{InstrumentationEngine, Output};

/// Host extension point: receives a unit's bytes, returns the bytes to load.
pub trait LoadHook: Send + Sync {
    fn on_load<'a>(&self, name: &str, bytes: &'a [u8]) -> Cow<'a, [u8]>;
}

/// [`LoadHook`] backed by an [`InstrumentationEngine`].
#[derive(Debug, Clone)]
pub struct InstrumentingHook {
    engine: Arc<InstrumentationEngine>,
}

impl InstrumentingHook {
    pub fn new(engine: Arc<InstrumentationEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<InstrumentationEngine> {
        &self.engine
    }
}

impl LoadHook for InstrumentingHook {
    fn on_load<'a>(&self, name: &str, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        let engine = &self.engine;
        match catch_unwind(AssertUnwindSafe(|| engine.transform_on_load(name, bytes))) {
            Ok(Ok(outcome)) => match outcome.output {
                Output::Rewritten(rewritten) => Cow::Owned(rewritten),
                Output::Unchanged => Cow::Borrowed(bytes),
            },
            Ok(Err(e)) => {
                warn!(unit = name, error = %e, "instrumentation failed, loading original bytes");
                Cow::Borrowed(bytes)
            }
            Err(_) => {
                engine.stats().record_failed();
                warn!(unit = name, "instrumentation panicked, loading original bytes");
                Cow::Borrowed(bytes)
            }
        }
    }
}
