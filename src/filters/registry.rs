//! Filter registry: name-keyed filter factories.
//!
//! The registry is an explicit value populated at session start, not a
//! process-wide table filled by static initializers. When two factories are
//! registered under one name the first one stays; the second registration is
//! reported as an error and otherwise ignored.

use super::builtin::BUILTIN_FILTERS;
use super::{FilterError, FilterHandle, VideoFilter};
use std::collections::HashMap;

/// Zero-argument constructor for a filter instance.
pub type FilterFactory = fn() -> Box<dyn VideoFilter>;

#[derive(Clone)]
pub struct FilterRegistry {
    factories: HashMap<String, FilterFactory>,
}

impl FilterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with all builtin filters registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_all(BUILTIN_FILTERS);
        log::debug!("Registered {} builtin filters", registry.len());
        registry
    }

    /// Register `factory` under `name`. The first registration wins.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: FilterFactory,
    ) -> Result<(), FilterError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            log::warn!("Filter '{name}' already registered, keeping the first factory");
            return Err(FilterError::AlreadyRegistered(name));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Register a list of entries, skipping names already present.
    /// Returns how many were added.
    pub fn register_all(&mut self, entries: &[(&str, FilterFactory)]) -> usize {
        entries
            .iter()
            .filter(|(name, factory)| self.register(*name, *factory).is_ok())
            .count()
    }

    /// Build a new instance of the filter registered under `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn VideoFilter>, FilterError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| FilterError::NotFound(name.to_string()))
    }

    /// Like [`create`](Self::create), wrapped for association with a source.
    pub fn create_handle(&self, name: &str) -> Result<FilterHandle, FilterError> {
        self.create(name).map(FilterHandle::new)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("names", &self.names())
            .finish()
    }
}
