//! Instrumentation engine.
//!
//! Decides per code unit whether and how to rewrite it and drives the
//! parse, rewrite and serialize pipeline. The engine keeps no per-call state:
//! any number of `transform` calls may run in parallel.
//!
//! `transform` is strict: an excluded unit is an error
//! ([`EngineError::NotInstrumentable`]). `transform_on_load` reports exclusion
//! as an unchanged outcome. Both propagate parse and serialize failures; the
//! load hook is the one caller that downgrades those.

pub mod probes;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::classfile::{ClassFile, ParseError, SerializeError};
use crate::filter::TargetFilter;
use crate::naming::QualifiedName;
use crate::policy::{Exclusion, ExclusionPolicy};
use crate::telemetry::TransformStats;

pub use probes::{find_probes, InjectionReport, ProbeId, ProbeInjector};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{name} cannot be instrumented: {reason:?}")]
    NotInstrumentable { name: String, reason: Exclusion },

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("serialize error: {0}")]
    Serialize(#[from] SerializeError),
}

/// Rewrite passes a transform request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RewritePass {
    /// Insert coverage probes when the unit matches the target filter.
    CoverageProbes,
}

/// Passes applied by [`InstrumentationEngine::transform`].
pub const DEFAULT_PASSES: &[RewritePass] = &[RewritePass::CoverageProbes];

/// Why a unit came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum Decision {
    /// Rejected by the exclusion policy; never parsed.
    Excluded { reason: Exclusion },
    /// Parsed and written back without probes.
    NotTargeted,
    Instrumented { methods: usize, probes: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Regenerated bytes are identical to the input.
    Unchanged,
    Rewritten(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub name: QualifiedName,
    pub decision: Decision,
    pub output: Output,
}

impl TransformOutcome {
    /// Bytes to hand back to the loader.
    pub fn bytes<'a>(&'a self, original: &'a [u8]) -> &'a [u8] {
        match &self.output {
            Output::Unchanged => original,
            Output::Rewritten(bytes) => bytes,
        }
    }

    pub fn is_rewritten(&self) -> bool {
        matches!(self.output, Output::Rewritten(_))
    }
}

/// Drives exclusion, filtering and rewriting for one unit at a time.
#[derive(Debug, Clone)]
pub struct InstrumentationEngine {
    filter: Arc<TargetFilter>,
    policy: ExclusionPolicy,
    stats: Arc<TransformStats>,
}

impl InstrumentationEngine {
    pub fn new(filter: Arc<TargetFilter>, policy: ExclusionPolicy) -> Self {
        Self {
            filter,
            policy,
            stats: Arc::new(TransformStats::new()),
        }
    }

    /// Share an existing statistics sink.
    pub fn with_stats(mut self, stats: Arc<TransformStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn filter(&self) -> &Arc<TargetFilter> {
        &self.filter
    }

    pub fn policy(&self) -> &ExclusionPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &Arc<TransformStats> {
        &self.stats
    }

    /// Transform with the default passes.
    pub fn transform(&self, name: &str, bytes: &[u8]) -> Result<TransformOutcome, EngineError> {
        self.transform_with(name, bytes, DEFAULT_PASSES)
    }

    pub fn transform_with(
        &self,
        name: &str,
        bytes: &[u8],
        passes: &[RewritePass],
    ) -> Result<TransformOutcome, EngineError> {
        self.run(name, bytes, passes, true)
    }

    /// Load-path variant: an excluded unit comes back as an unchanged
    /// outcome instead of an error. Other errors still propagate.
    pub fn transform_on_load(&self, name: &str, bytes: &[u8]) -> Result<TransformOutcome, EngineError> {
        self.run(name, bytes, DEFAULT_PASSES, false)
    }

    fn run(
        &self,
        name: &str,
        bytes: &[u8],
        passes: &[RewritePass],
        strict: bool,
    ) -> Result<TransformOutcome, EngineError> {
        let name = QualifiedName::canonical(name);
        if let Some(reason) = self.policy.exclusion(&name) {
            self.stats.record_excluded();
            debug!(unit = %name, ?reason, "excluded");
            if strict {
                return Err(EngineError::NotInstrumentable {
                    name: name.dotted().to_string(),
                    reason,
                });
            }
            return Ok(TransformOutcome {
                name,
                decision: Decision::Excluded { reason },
                output: Output::Unchanged,
            });
        }

        match self.rewrite(&name, bytes, passes) {
            Ok(outcome) => {
                match outcome.decision {
                    Decision::Instrumented { probes, .. } => self.stats.record_instrumented(probes),
                    _ => self.stats.record_not_targeted(),
                }
                debug!(unit = %name, decision = ?outcome.decision, "transformed");
                Ok(outcome)
            }
            Err(e) => {
                self.stats.record_failed();
                Err(e)
            }
        }
    }

    fn rewrite(
        &self,
        name: &QualifiedName,
        bytes: &[u8],
        passes: &[RewritePass],
    ) -> Result<TransformOutcome, EngineError> {
        let mut class = ClassFile::parse(bytes)?;
        let prefixes = self.filter.snapshot();

        let mut report: Option<InjectionReport> = None;
        for pass in passes {
            match pass {
                RewritePass::CoverageProbes if prefixes.matches(name) => {
                    report = Some(ProbeInjector::new(name.dotted()).inject(&mut class)?);
                }
                RewritePass::CoverageProbes => {}
            }
        }

        let regenerated = class.to_bytes()?;
        let output = if regenerated == bytes {
            Output::Unchanged
        } else {
            Output::Rewritten(regenerated)
        };
        let decision = match report {
            Some(r) => Decision::Instrumented {
                methods: r.methods,
                probes: r.probes,
            },
            None => Decision::NotTargeted,
        };

        Ok(TransformOutcome {
            name: name.clone(),
            decision,
            output,
        })
    }
}
