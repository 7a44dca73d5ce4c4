//! `metrics` facade counters.

use metrics::counter;

pub const TRANSFORMS_TOTAL: &str = "coverage_agent_transforms_total";
pub const PROBES_TOTAL: &str = "coverage_agent_probes_total";
pub const RECONFIGURATIONS_TOTAL: &str = "coverage_agent_reconfigurations_total";

/// Count one load event by outcome (`excluded`, `not_targeted`,
/// `instrumented`, `failed`).
pub fn record_transform(outcome: &'static str) {
    counter!(TRANSFORMS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_probes(count: usize) {
    counter!(PROBES_TOTAL).increment(count as u64);
}

/// Count a control-channel reconfiguration attempt.
pub fn record_reconfiguration(accepted: bool) {
    let result = if accepted { "accepted" } else { "rejected" };
    counter!(RECONFIGURATIONS_TOTAL, "result" => result).increment(1);
}
