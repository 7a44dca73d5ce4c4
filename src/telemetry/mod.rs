//! Telemetry for the coverage agent.
//!
//! Structured logging through `tracing` and counters through the `metrics`
//! facade. The agent installs no exporter of its own; a host application that
//! embeds the library may install one.

mod logging;
mod metrics;
mod store;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{record_probes, record_reconfiguration, record_transform};
pub use store::{StatsSnapshot, TransformStats};
