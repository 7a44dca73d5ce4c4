//! Host bindings.
//!
//! [`InProcessHost`] keeps registered hooks in memory and replays loads
//! through them; the CLI and the tests use it in place of a JVM. The JVMTI
//! binding is compiled with the `jvmti` feature.

#[cfg(feature = "jvmti")]
pub mod jvmti;

use std::borrow::Cow;
use std::sync::Arc;

use crate::bootstrap::{HostEnvironment, HostError};
use crate::hook::LoadHook;

/// Host that runs class bytes through its registered hooks on request.
#[derive(Default)]
pub struct InProcessHost {
    hooks: Vec<Arc<dyn LoadHook>>,
}

impl InProcessHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Simulate one class load: every hook sees the previous hook's output.
    pub fn load<'a>(&self, name: &str, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        let mut current = Cow::Borrowed(bytes);
        for hook in &self.hooks {
            current = match current {
                Cow::Borrowed(b) => hook.on_load(name, b),
                Cow::Owned(owned) => Cow::Owned(hook.on_load(name, &owned).into_owned()),
            };
        }
        current
    }
}

impl HostEnvironment for InProcessHost {
    fn register(&mut self, hook: Arc<dyn LoadHook>) -> Result<(), HostError> {
        self.hooks.push(hook);
        Ok(())
    }
}

impl std::fmt::Debug for InProcessHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessHost")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
