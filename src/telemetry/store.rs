//! In-process transform counters.
//!
//! Complements the `metrics` facade: the facade feeds whatever exporter the
//! host installs, while these values are reported over the control channel.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::metrics::{record_probes, record_transform};

/// Point-in-time copy of [`TransformStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Load events rejected by the exclusion policy.
    pub excluded: u64,
    /// Units parsed and written back without probes.
    pub not_targeted: u64,
    pub instrumented: u64,
    /// Load events where the engine failed and original bytes were returned.
    pub failed: u64,
    /// Probes inserted across all instrumented units.
    pub probes: u64,
}

/// Thread-safe transform counters.
#[derive(Debug, Default)]
pub struct TransformStats {
    excluded: AtomicU64,
    not_targeted: AtomicU64,
    instrumented: AtomicU64,
    failed: AtomicU64,
    probes: AtomicU64,
}

impl TransformStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_excluded(&self) {
        self.excluded.fetch_add(1, Ordering::Relaxed);
        record_transform("excluded");
    }

    pub fn record_not_targeted(&self) {
        self.not_targeted.fetch_add(1, Ordering::Relaxed);
        record_transform("not_targeted");
    }

    pub fn record_instrumented(&self, probes: usize) {
        self.instrumented.fetch_add(1, Ordering::Relaxed);
        self.probes.fetch_add(probes as u64, Ordering::Relaxed);
        record_transform("instrumented");
        record_probes(probes);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        record_transform("failed");
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            excluded: self.excluded.load(Ordering::Relaxed),
            not_targeted: self.not_targeted.load(Ordering::Relaxed),
            instrumented: self.instrumented.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            probes: self.probes.load(Ordering::Relaxed),
        }
    }
}
