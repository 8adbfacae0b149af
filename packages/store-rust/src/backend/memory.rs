//! In-process [`Backend`] backed by [`DashMap`].
//!
//! Provides concurrent read/write access without external locking. Expiry is
//! native: each entry carries an absolute deadline checked against the
//! injected [`ClockSource`], and expired entries are dropped lazily when
//! touched or skipped when listed.

use std::sync::Arc;
use std::time::Duration;

use anystore_core::clock::{expiry_from, ClockSource, SystemClock};
use anystore_core::error::{Result, StoreError};
use anystore_core::key::KeyFilter;
use dashmap::DashMap;

use super::{Backend, BackendKind, BackendStat, KeyStream};

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    created_at: i64,
    updated_at: i64,
    expires_at: Option<i64>,
}

impl Entry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// Memory storage for tests and ephemeral caches.
pub struct MemoryBackend {
    uri: String,
    entries: DashMap<String, Entry>,
    clock: Arc<dyn ClockSource>,
}

impl MemoryBackend {
    /// Creates an empty backend using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty backend that reads time from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            uri: "memory://".to_string(),
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries.iter().filter(|e| e.value().is_live(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the live entry at `key`, purging it if expired.
    fn live(&self, key: &str) -> Option<Entry> {
        let now = self.clock.now_millis();
        let entry = self.entries.get(key).map(|e| e.value().clone())?;
        if entry.is_live(now) {
            Some(entry)
        } else {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
            None
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key).is_some())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.live(key)
            .map(|e| e.data)
            .ok_or_else(|| StoreError::does_not_exist(key))
    }

    fn write(&self, key: &str, data: &[u8], ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now_millis();
        let expires_at = ttl.and_then(|ttl| expiry_from(now, ttl));
        self.entries
            .entry(key.to_string())
            .and_modify(|e| {
                if !e.is_live(now) {
                    e.created_at = now;
                }
                e.data = data.to_vec();
                e.updated_at = now;
                e.expires_at = expires_at;
            })
            .or_insert_with(|| Entry {
                data: data.to_vec(),
                created_at: now,
                updated_at: now,
                expires_at,
            });
        tracing::trace!(key, size = data.len(), "memory write");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, e)| e.is_live(now))
            .map(|(_, e)| e.data))
    }

    fn list_keys(&self, filter: &KeyFilter) -> Result<KeyStream> {
        let now = self.clock.now_millis();
        // Snapshot so concurrent writers never block on a long-lived listing.
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_live(now) && filter.matches(e.key()))
            .map(|e| e.key().clone())
            .collect();
        Ok(Box::new(keys.into_iter().map(Ok)))
    }

    fn stat(&self, key: &str) -> Result<Option<BackendStat>> {
        Ok(self.live(key).map(|e| BackendStat {
            size: e.data.len() as u64,
            created_at: Some(e.created_at),
            updated_at: Some(e.updated_at),
        }))
    }

    fn supports_ttl(&self) -> bool {
        true
    }

    fn pop_is_atomic(&self) -> bool {
        true
    }
}
