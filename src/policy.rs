//! Exclusion policy: code units that must never be rewritten.
//!
//! Evaluated on every load event before anything else, whatever the target
//! prefixes say. Covers the agent's own namespace (the probe recorder lives
//! there, instrumenting it would recurse), the platform core library that loads
//! before the agent is ready, and tooling libraries that are never coverage
//! targets.

use serde::{Deserialize, Serialize};

use crate::naming::QualifiedName;

/// Namespace of the agent and its runtime support classes.
pub const AGENT_NAMESPACE: &str = "coverage.agent.";

/// Platform core and bootstrap-loaded namespaces.
const CORE_LIBRARY: &[&str] = &[
    "java.",
    "javax.",
    "jdk.",
    "sun.",
    "com.sun.",
    "org.ietf.",
    "org.omg.",
    "org.w3c.",
    "org.xml.",
    "kotlin.",
    "scala.",
];

/// Third-party internals that are never coverage targets.
const THIRD_PARTY: &[&str] = &[
    "org.objectweb.asm.",
    "net.bytebuddy.",
    "org.jacoco.",
    "org.junit.",
    "junit.",
    "org.mockito.",
    "org.gradle.",
    "org.apache.maven.",
    "org.slf4j.",
    "ch.qos.logback.",
    "org.apache.logging.log4j.",
];

/// Why a unit was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exclusion {
    /// Empty or array name; nothing loadable to rewrite.
    Unnamed,
    /// Inside the agent's own namespace.
    AgentNamespace,
    /// Platform core library.
    CoreLibrary,
    /// Built-in or configured third-party exclusion.
    ThirdParty,
}

/// Static predicate set, fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct ExclusionPolicy {
    extra: Vec<String>,
}

impl ExclusionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy with additional excluded prefixes (dotted or internal form).
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extra = extra
            .into_iter()
            .map(|s| s.as_ref().trim().replace('/', "."))
            .filter(|s| !s.is_empty())
            .collect();
        Self { extra }
    }

    /// The reason this unit is excluded, or `None` if it may be instrumented.
    pub fn exclusion(&self, name: &QualifiedName) -> Option<Exclusion> {
        if name.is_empty() || name.dotted().starts_with('[') {
            return Some(Exclusion::Unnamed);
        }
        if name.starts_with(AGENT_NAMESPACE) {
            return Some(Exclusion::AgentNamespace);
        }
        if CORE_LIBRARY.iter().any(|p| name.starts_with(p)) {
            return Some(Exclusion::CoreLibrary);
        }
        if THIRD_PARTY.iter().any(|p| name.starts_with(p))
            || self.extra.iter().any(|p| name.starts_with(p))
        {
            return Some(Exclusion::ThirdParty);
        }
        None
    }

    pub fn can_instrument(&self, name: &QualifiedName) -> bool {
        self.exclusion(name).is_none()
    }
}
