//! Coverage Agent
//!
//! Load-time class instrumentation for code coverage. The host (a JVM, via
//! the `jvmti` feature) hands every class it loads to a [`hook::LoadHook`];
//! classes inside the configured namespace prefixes come back with a probe
//! call at each method entry and branch target.
//!
//! # Components
//!
//! - [`naming`]: dotted and internal class names
//! - [`policy`]: classes that are never rewritten
//! - [`filter`]: the live, replaceable set of target prefixes
//! - [`classfile`]: class-file parser and writer, method-body rewriting
//! - [`instrument`]: the engine and the coverage probe injector
//! - [`hook`]: the load-time adapter that never fails a class load
//! - [`control`]: optional TCP channel for replacing prefixes at runtime
//! - [`bootstrap`]: `Unstarted -> Initialized -> Active`
//!
//! # Example
//!
//! ```no_run
//! use coverage_agent::bootstrap::Bootstrap;
//! use coverage_agent::config::AgentConfig;
//! use coverage_agent::host::InProcessHost;
//!
//! let mut host = InProcessHost::new();
//! let agent = Bootstrap::start(AgentConfig::with_prefixes("com.acme"), &mut host)?;
//! let original = std::fs::read("Foo.class")?;
//! let loaded = host.load("com/acme/Foo", &original);
//! # let _ = (agent, loaded);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bootstrap;
pub mod classfile;
pub mod cli;
pub mod config;
pub mod control;
pub mod filter;
pub mod hook;
pub mod host;
pub mod instrument;
pub mod naming;
pub mod policy;
pub mod telemetry;

pub use bootstrap::{AgentState, Bootstrap, BootstrapError, HostEnvironment};
pub use config::{AgentConfig, ConfigError};
pub use filter::{PrefixSet, TargetFilter};
pub use hook::{InstrumentingHook, LoadHook};
pub use instrument::{Decision, EngineError, InstrumentationEngine, Output, TransformOutcome};
pub use naming::QualifiedName;
pub use policy::{Exclusion, ExclusionPolicy};
