//! Provider-state handler registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::handler::StateHandler;

/// Maps provider-state names to their handlers.
///
/// Names are case-sensitive and unique; registering a name twice replaces the
/// earlier handler. The registry is built before a verification run and only
/// read afterwards, so it is shared behind an `Arc` without locking.
#[derive(Clone, Default)]
pub struct StateHandlerRegistry {
    handlers: HashMap<String, Arc<dyn StateHandler>>,
}

impl StateHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `state`, builder style.
    pub fn with_handler(mut self, state: impl Into<String>, handler: impl StateHandler + 'static) -> Self {
        self.insert(state, handler);
        self
    }

    /// Register `handler` for `state`.
    pub fn insert(&mut self, state: impl Into<String>, handler: impl StateHandler + 'static) {
        self.handlers.insert(state.into(), Arc::new(handler));
    }

    /// Look up the handler for `state`.
    pub fn resolve(&self, state: &str) -> Option<Arc<dyn StateHandler>> {
        self.handlers.get(state).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered state names, sorted.
    pub fn states(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for StateHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateHandlerRegistry")
            .field("states", &self.states())
            .finish()
    }
}
