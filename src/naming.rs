//! Qualified names for code units.
//!
//! The loader hands names over in internal form (`com/acme/Foo`), while
//! prefixes and diagnostics use the dotted form (`com.acme.Foo`). Equality and
//! prefix checks always run on the dotted form.

use std::fmt;

/// Immutable name of one code unit, kept in both separator forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    dotted: String,
    slashed: String,
}

impl QualifiedName {
    /// Normalize a raw loader-supplied name. Empty input yields an empty name.
    pub fn canonical(raw: &str) -> Self {
        let dotted = raw.trim().replace('/', ".");
        let slashed = dotted.replace('.', "/");
        Self { dotted, slashed }
    }

    /// Dotted form, e.g. `com.acme.Foo`.
    pub fn dotted(&self) -> &str {
        &self.dotted
    }

    /// Internal (slash separated) form, e.g. `com/acme/Foo`.
    pub fn slashed(&self) -> &str {
        &self.slashed
    }

    pub fn is_empty(&self) -> bool {
        self.dotted.is_empty()
    }

    /// Literal textual prefix test on the dotted form.
    ///
    /// Not segment aware: `com.acme` matches `com.acmeX.Foo`.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.dotted.starts_with(prefix)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted)
    }
}

impl From<&str> for QualifiedName {
    fn from(raw: &str) -> Self {
        Self::canonical(raw)
    }
}
