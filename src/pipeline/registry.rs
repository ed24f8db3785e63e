//! Step type registry — string tag to factory function.
//!
//! Replaces reflective plugin discovery with an explicit registration table:
//! the embedding program registers every step type it wants available before
//! preparing a pipeline. Built-in types ship pre-registered via
//! [`StepRegistry::with_builtins`].

use crate::pipeline::step::StepPlugin;
use std::collections::HashMap;

type StepFactory = Box<dyn Fn() -> Box<dyn StepPlugin> + Send + Sync>;

/// Registry mapping step type tags to constructors.
#[derive(Default)]
pub struct StepRegistry {
    factories: HashMap<String, StepFactory>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in step type registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::pipeline::steps::register_builtins(&mut registry);
        registry
    }

    /// Register a factory under `tag`. Re-registering a tag replaces the
    /// previous factory.
    pub fn register<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn StepPlugin> + Send + Sync + 'static,
    {
        self.factories.insert(tag.into(), Box::new(factory));
    }

    /// Instantiate a fresh plugin for `tag`.
    pub fn create(&self, tag: &str) -> Option<Box<dyn StepPlugin>> {
        self.factories.get(tag).map(|f| f())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_present() {
        let registry = StepRegistry::with_builtins();
        for tag in ["injector", "generator", "filter", "dummy", "sub-pipeline"] {
            assert!(registry.contains(tag), "missing builtin '{tag}'");
        }
        assert!(registry.create("generator").is_some());
        assert!(registry.create("nope").is_none());
    }
}
