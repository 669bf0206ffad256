//! Process-wide lookup for the running actor runtime.

use std::sync::RwLock;

use crate::runtime::ActorRuntime;

/// Global registry for the actor runtime.
///
/// Lets code that cannot have the runtime passed in (signal handlers,
/// bootstrap glue) find it without threading it through every call.
pub struct RuntimeRegistry {
    runtime: RwLock<Option<ActorRuntime>>,
}

impl RuntimeRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            runtime: RwLock::new(None),
        }
    }

    /// Install the runtime, replacing any previous one.
    pub fn register_runtime(&self, runtime: ActorRuntime) {
        *self.runtime.write().unwrap_or_else(|e| e.into_inner()) = Some(runtime);
    }

    /// Get the runtime, if one has been installed.
    pub fn runtime(&self) -> Option<ActorRuntime> {
        self.runtime
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Remove and return the installed runtime.
    pub fn take_runtime(&self) -> Option<ActorRuntime> {
        self.runtime
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global registry instance.
static REGISTRY: std::sync::LazyLock<RuntimeRegistry> =
    std::sync::LazyLock::new(RuntimeRegistry::new);

/// Get the global runtime registry.
pub fn global_registry() -> &'static RuntimeRegistry {
    &REGISTRY
}
