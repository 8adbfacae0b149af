//! Shared, lazily opened stores keyed by their configuration.
//!
//! Opening a backend can be expensive (connection pools, clients, runtimes).
//! A [`StoreRegistry`] opens each distinct [`StoreConfig`] once and hands out
//! the same `Arc<Store>` afterwards, so two lookups of `memory://` also see
//! the same data.

use std::sync::Arc;

use anystore_core::error::{Result, StoreError};
use dashmap::DashMap;

use crate::backend::BackendKind;
use crate::config::StoreConfig;
use crate::io::split_location;
use crate::resolver::resolve;
use crate::store::Store;

/// Cache of opened stores.
#[derive(Default)]
pub struct StoreRegistry {
    /// Serialized configuration -> opened store.
    stores: DashMap<String, Arc<Store>>,
}

impl StoreRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the store for `config`, opening it on first use.
    ///
    /// # Errors
    ///
    /// See [`Store::new`].
    pub fn get(&self, config: &StoreConfig) -> Result<Arc<Store>> {
        let id = serde_json::to_string(config).map_err(|e| StoreError::serialization("json", e))?;
        if let Some(store) = self.stores.get(&id) {
            return Ok(store.clone());
        }
        // Opened outside the map lock; a racing open of the same config loses.
        let store = Arc::new(Store::new(config.clone())?);
        Ok(self.stores.entry(id).or_insert(store).clone())
    }

    /// [`StoreRegistry::get`] with default settings for `uri`.
    ///
    /// # Errors
    ///
    /// See [`Store::new`].
    pub fn get_uri(&self, uri: &str) -> Result<Arc<Store>> {
        self.get(&StoreConfig::with_uri(uri))
    }

    /// Splits a location into its store (opened through the registry) and
    /// the key inside it.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotSupported`] for memory, redis and SQL URIs, whose
    /// keys are not paths; see also [`Store::new`].
    pub fn for_location(&self, location: &str) -> Result<(Arc<Store>, String)> {
        let resolved = resolve(location)?;
        if matches!(resolved.kind, BackendKind::Memory | BackendKind::Redis | BackendKind::Sql) {
            return Err(StoreError::NotSupported {
                operation: "locating a key by path",
                backend: resolved.kind.as_str(),
            });
        }
        let (uri, key) = split_location(location);
        Ok((self.get_uri(&uri)?, key))
    }

    /// Number of opened stores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Forgets every store. Stores still referenced elsewhere stay open.
    pub fn clear(&self) {
        self.stores.clear();
    }
}

#[cfg(test)]
mod tests {
    use anystore_core::error::ErrorKind;
    use anystore_core::value::Value;

    use super::*;

    #[test]
    fn same_config_yields_same_store() {
        let registry = StoreRegistry::new();
        let a = registry.get_uri("memory://").unwrap();
        a.put("k", 1).unwrap();
        let b = registry.get_uri("memory://").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.get("k").unwrap(), Value::from(1));
        assert_eq!(registry.len(), 1);

        let mut config = StoreConfig::with_uri("memory://");
        config.key_prefix = "other".into();
        let c = registry.get(&config).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn locations_resolve_to_store_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StoreRegistry::new();
        let location = dir.path().join("sub").join("file.txt").display().to_string();
        let (store, key) = registry.for_location(&location).unwrap();
        assert_eq!(key, "file.txt");
        store.put(&key, "x").unwrap();
        assert!(dir.path().join("sub").join("file.txt").exists());

        let err = registry.for_location("memory://k").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }
}
