//! Backend Registry
//!
//! Named backend instances, owned by whoever builds the server rather than
//! by any global state.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::Backend;
use crate::config::Config;
use crate::engine::Engine;
use crate::error::{Result, VaultError};

/// Named backends available to a server
#[derive(Default)]
pub struct Registry {
    backends: RwLock<BTreeMap<String, Arc<dyn Backend>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend under `name`; names are unique
    pub fn register(&self, name: impl Into<String>, backend: Arc<dyn Backend>) -> Result<()> {
        let name = name.into();
        let mut backends = self.backends.write();
        if backends.contains_key(&name) {
            return Err(VaultError::Config(format!(
                "backend {:?} is already registered",
                name
            )));
        }
        tracing::debug!("registered backend {:?}", name);
        backends.insert(name, backend);
        Ok(())
    }

    /// Open an engine from `config` and register it under `name`
    ///
    /// If `name` is already registered the existing backend is returned and
    /// `config` is ignored.
    pub fn open_engine(&self, name: &str, config: Config) -> Result<Arc<dyn Backend>> {
        let mut backends = self.backends.write();
        if let Some(existing) = backends.get(name) {
            return Ok(Arc::clone(existing));
        }
        let engine: Arc<dyn Backend> = Arc::new(Engine::open(config)?);
        tracing::debug!("registered engine {:?}", name);
        backends.insert(name.to_string(), Arc::clone(&engine));
        Ok(engine)
    }

    /// Look a backend up by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.read().get(name).cloned()
    }

    /// Look a backend up by name, failing if absent
    pub fn require(&self, name: &str) -> Result<Arc<dyn Backend>> {
        self.get(name)
            .ok_or_else(|| VaultError::Config(format!("unknown backend {:?}", name)))
    }

    /// Drop a backend from the registry
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.write().remove(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.backends.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }
}
