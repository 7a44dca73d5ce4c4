//! Target filter: the replaceable set of namespace prefixes selected for coverage.
//!
//! Load events read the current [`PrefixSet`] concurrently with reconfiguration.
//! The set is never mutated in place; `configure` builds a complete new set and
//! swaps the shared pointer, so every reader sees either the old or the new set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::naming::QualifiedName;

/// Ordered, duplicate-free, never-empty list of prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixSet {
    prefixes: Vec<String>,
}

impl PrefixSet {
    /// Split on `,`, trim, drop empty tokens and duplicates.
    ///
    /// Internal-form prefixes (`com/acme`) are normalized to dotted form.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut prefixes: Vec<String> = Vec::new();
        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let token = token.replace('/', ".");
            if !prefixes.contains(&token) {
                prefixes.push(token);
            }
        }

        if prefixes.is_empty() {
            return Err(ConfigError::NoPrefixes);
        }
        Ok(Self { prefixes })
    }

    pub fn as_slice(&self) -> &[String] {
        &self.prefixes
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    /// True if any prefix is a literal textual prefix of the name.
    pub fn matches(&self, name: &QualifiedName) -> bool {
        self.prefixes.iter().any(|p| name.starts_with(p))
    }
}

/// Shared handle to the active prefix set.
#[derive(Debug)]
pub struct TargetFilter {
    current: RwLock<Arc<PrefixSet>>,
    generation: AtomicU64,
}

impl TargetFilter {
    /// Build a filter from a raw prefix list.
    pub fn new(raw: &str) -> Result<Self, ConfigError> {
        let set = PrefixSet::parse(raw)?;
        Ok(Self {
            current: RwLock::new(Arc::new(set)),
            generation: AtomicU64::new(0),
        })
    }

    /// Replace the active set. On error the current set stays in place.
    pub fn configure(&self, raw: &str) -> Result<Arc<PrefixSet>, ConfigError> {
        let set = Arc::new(PrefixSet::parse(raw)?);
        {
            let mut current = self.current.write();
            *current = set.clone();
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        tracing::info!(prefixes = ?set.as_slice(), "target prefixes replaced");
        Ok(set)
    }

    /// The complete set active at the time of the call.
    pub fn snapshot(&self) -> Arc<PrefixSet> {
        self.current.read().clone()
    }

    pub fn matches(&self, name: &QualifiedName) -> bool {
        self.snapshot().matches(name)
    }

    /// Number of successful reconfigurations since construction.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
