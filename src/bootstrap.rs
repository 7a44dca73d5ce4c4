//! Agent bootstrap.
//!
//! `Unstarted -> Initialized -> Active`, forward only. `initialize` builds the
//! target filter from the startup prefixes and fails when none are usable;
//! `activate` starts the control channel (when configured) and registers the
//! load hook with the host. Reconfiguration over the control channel mutates
//! the filter and never changes the bootstrap state.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::config::{AgentConfig, ConfigError};
use crate::control::{self, ControlHandle, ControlHandler, ServerError};
use crate::filter::TargetFilter;
use crate::hook::{InstrumentingHook, LoadHook};
use crate::instrument::InstrumentationEngine;
use crate::policy::ExclusionPolicy;
use crate::telemetry::TransformStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Unstarted,
    Initialized,
    Active,
}

impl AgentState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => AgentState::Initialized,
            2 => AgentState::Active,
            _ => AgentState::Unstarted,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Unstarted => "unstarted",
            AgentState::Initialized => "initialized",
            AgentState::Active => "active",
        };
        f.write_str(s)
    }
}

/// Agent state readable from other threads (the control channel reports it).
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: AgentState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> AgentState {
        AgentState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: AgentState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[derive(Debug, Error)]
#[error("host registration failed: {0}")]
pub struct HostError(pub String);

/// The host's load-time extension point.
pub trait HostEnvironment {
    /// Install `hook` so that it sees every subsequent class load.
    fn register(&mut self, hook: Arc<dyn LoadHook>) -> Result<(), HostError>;
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: AgentState, to: AgentState },

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("control channel error: {0}")]
    Control(#[from] ServerError),
}

/// Owns the agent's shared components for the life of the process.
pub struct Bootstrap {
    config: AgentConfig,
    state: Arc<StateCell>,
    stats: Arc<TransformStats>,
    filter: Option<Arc<TargetFilter>>,
    engine: Option<Arc<InstrumentationEngine>>,
    control: Option<ControlHandle>,
}

impl Bootstrap {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            state: Arc::new(StateCell::new(AgentState::Unstarted)),
            stats: Arc::new(TransformStats::new()),
            filter: None,
            engine: None,
            control: None,
        }
    }

    /// `new`, `initialize` and `activate` in one call.
    pub fn start(config: AgentConfig, host: &mut dyn HostEnvironment) -> Result<Self, BootstrapError> {
        let mut bootstrap = Self::new(config);
        bootstrap.initialize()?;
        bootstrap.activate(host)?;
        Ok(bootstrap)
    }

    pub fn state(&self) -> AgentState {
        self.state.get()
    }

    fn transition(&self, from: AgentState, to: AgentState) -> Result<(), BootstrapError> {
        let current = self.state.get();
        if current != from {
            return Err(BootstrapError::InvalidTransition { from: current, to });
        }
        Ok(())
    }

    /// Configure the target filter from the startup prefixes.
    pub fn initialize(&mut self) -> Result<(), BootstrapError> {
        self.transition(AgentState::Unstarted, AgentState::Initialized)?;

        let filter = match TargetFilter::new(&self.config.prefixes) {
            Ok(filter) => Arc::new(filter),
            Err(e) => {
                error!(error = %e, "invalid startup prefixes, agent stays inactive");
                return Err(e.into());
            }
        };
        let policy = ExclusionPolicy::with_extra(self.config.exclusions.iter().cloned());
        let engine = InstrumentationEngine::new(Arc::clone(&filter), policy)
            .with_stats(Arc::clone(&self.stats));

        info!(prefixes = ?filter.snapshot().as_slice(), "agent initialized");
        self.filter = Some(filter);
        self.engine = Some(Arc::new(engine));
        self.state.set(AgentState::Initialized);
        Ok(())
    }

    /// Start the control channel if configured, then register the load hook.
    pub fn activate(&mut self, host: &mut dyn HostEnvironment) -> Result<(), BootstrapError> {
        self.transition(AgentState::Initialized, AgentState::Active)?;
        let (Some(filter), Some(engine)) = (&self.filter, &self.engine) else {
            return Err(BootstrapError::InvalidTransition {
                from: self.state.get(),
                to: AgentState::Active,
            });
        };

        let control = match &self.config.control {
            Some(server) => {
                let handler = Arc::new(ControlHandler::new(
                    Arc::clone(filter),
                    Arc::clone(&self.stats),
                    Arc::clone(&self.state),
                    server.max_frame_size,
                ));
                Some(control::spawn(server, self.config.connections.clone(), handler)?)
            }
            None => None,
        };

        let hook: Arc<dyn LoadHook> = Arc::new(InstrumentingHook::new(Arc::clone(engine)));
        if let Err(e) = host.register(hook) {
            if let Some(handle) = control {
                handle.shutdown();
            }
            return Err(e.into());
        }

        self.control = control;
        self.state.set(AgentState::Active);
        info!(control = ?self.control_addr(), "agent active");
        Ok(())
    }

    pub fn filter(&self) -> Option<&Arc<TargetFilter>> {
        self.filter.as_ref()
    }

    pub fn engine(&self) -> Option<&Arc<InstrumentationEngine>> {
        self.engine.as_ref()
    }

    pub fn stats(&self) -> &Arc<TransformStats> {
        &self.stats
    }

    /// Bound control channel address, when one is listening.
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control.as_ref().map(ControlHandle::local_addr)
    }

    /// Stop the control channel. The state stays `Active`: the hook remains
    /// registered for as long as the host keeps it.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.control.take() {
            handle.shutdown();
        }
    }
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("state", &self.state.get())
            .field("control", &self.control_addr())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        hooks: Vec<Arc<dyn LoadHook>>,
        fail: bool,
    }

    impl HostEnvironment for Recorder {
        fn register(&mut self, hook: Arc<dyn LoadHook>) -> Result<(), HostError> {
            if self.fail {
                return Err(HostError("capability missing".into()));
            }
            self.hooks.push(hook);
            Ok(())
        }
    }

    #[test]
    fn test_state_cell_roundtrip() {
        let cell = StateCell::new(AgentState::Unstarted);
        cell.set(AgentState::Active);
        assert_eq!(cell.get(), AgentState::Active);
    }

    #[test]
    fn test_start_reaches_active() {
        let mut host = Recorder::default();
        let b = Bootstrap::start(AgentConfig::with_prefixes("com.acme"), &mut host).unwrap();
        assert_eq!(b.state(), AgentState::Active);
        assert_eq!(host.hooks.len(), 1);
        assert!(b.control_addr().is_none());
    }

    #[test]
    fn test_empty_prefixes_fail_fast() {
        let mut b = Bootstrap::new(AgentConfig::with_prefixes(" , "));
        assert!(matches!(
            b.initialize(),
            Err(BootstrapError::Config(ConfigError::NoPrefixes))
        ));
        assert_eq!(b.state(), AgentState::Unstarted);
    }

    #[test]
    fn test_activate_before_initialize_rejected() {
        let mut b = Bootstrap::new(AgentConfig::with_prefixes("com.acme"));
        let err = b.activate(&mut Recorder::default()).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::InvalidTransition {
                from: AgentState::Unstarted,
                to: AgentState::Active
            }
        ));
    }

    #[test]
    fn test_host_failure_keeps_initialized() {
        let mut b = Bootstrap::new(AgentConfig::with_prefixes("com.acme"));
        b.initialize().unwrap();
        let mut host = Recorder {
            fail: true,
            ..Default::default()
        };
        assert!(matches!(b.activate(&mut host), Err(BootstrapError::Host(_))));
        assert_eq!(b.state(), AgentState::Initialized);
    }

    #[test]
    fn test_no_second_initialize() {
        let mut b = Bootstrap::new(AgentConfig::with_prefixes("com.acme"));
        b.initialize().unwrap();
        assert!(matches!(
            b.initialize(),
            Err(BootstrapError::InvalidTransition { .. })
        ));
    }
}
