//! Per-key metadata returned by `info`.

use serde::{Deserialize, Serialize};

use crate::key::key_name;

/// Size and timestamps of a stored key.
///
/// Timestamps are milliseconds since the Unix epoch. Backends that do not
/// track them report `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Logical key (namespace stripped).
    pub key: String,
    /// Last path segment of `key`.
    pub name: String,
    /// Base URI of the store the key lives in.
    pub store: String,
    /// Stored size in bytes.
    pub size: u64,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

impl Stats {
    /// Builds stats for `key` in `store`; `name` is derived from the key.
    #[must_use]
    pub fn new(
        store: impl Into<String>,
        key: impl Into<String>,
        size: u64,
        created_at: Option<i64>,
        updated_at: Option<i64>,
    ) -> Self {
        let key = key.into();
        Self {
            name: key_name(&key).to_string(),
            key,
            store: store.into(),
            size,
            created_at,
            updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_derived_from_key() {
        let stats = Stats::new("memory://", "reports/2024/q1.pdf", 12, None, Some(5));
        assert_eq!(stats.name, "q1.pdf");
        assert_eq!(stats.store, "memory://");
        assert_eq!(stats.updated_at, Some(5));
    }

    #[test]
    fn serializes_to_json() {
        let stats = Stats::new("s", "k", 1, None, None);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["name"], "k");
        assert!(json["created_at"].is_null());
    }
}
