//! Registry of functions the local service knows how to evaluate.

use crate::core::error::RemoteResult;
use crate::core::types::Value;
use crate::execution::local::CallContext;
use indexmap::IndexMap;
use std::sync::Arc;

/// Implementation of one service function.
pub type Builtin = Arc<dyn Fn(&CallContext<'_>) -> RemoteResult<Value> + Send + Sync>;

/// Function implementations indexed by their service API name
/// (e.g. `"Image.register"`).
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: IndexMap<String, Builtin>,
}

impl FunctionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            functions: IndexMap::new(),
        }
    }

    /// Create a registry pre-populated with the built-in functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::execution::builtins::register_all(&mut registry);
        registry
    }

    /// Register (or replace) a function.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&CallContext<'_>) -> RemoteResult<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Look up a function.
    pub fn get(&self, name: &str) -> Option<&Builtin> {
        self.functions.get(name)
    }

    /// Check if a function is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Get the total number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}
