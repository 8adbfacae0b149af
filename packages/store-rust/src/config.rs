//! Store configuration.

use std::path::Path;
use std::time::Duration;

use anystore_core::error::{Result, StoreError};
use anystore_core::serialize::Mode;
use serde::{Deserialize, Serialize};

/// Backend-specific options, forwarded untouched to the selected driver.
pub type BackendConfig = serde_json::Map<String, serde_json::Value>;

/// Configuration resolved once per [`Store`](crate::store::Store).
///
/// Never mutated after the store is built; per-call behavior is changed with
/// [`ReadOptions`](crate::store::ReadOptions) and
/// [`WriteOptions`](crate::store::WriteOptions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection string: a path, `memory://`, `sqlite:///...`, `s3://...`, ...
    pub uri: String,
    /// Default serialization mode.
    pub serialization_mode: Mode,
    /// Whether reading a missing key fails (`true`) or yields [`Value::Null`](anystore_core::Value::Null).
    pub raise_on_nonexist: bool,
    /// Default TTL in seconds for writes. 0 = no expiry.
    pub default_ttl: u64,
    /// Namespace prepended to every key by the store.
    pub key_prefix: String,
    /// Reject every write-class operation.
    pub readonly: bool,
    /// Whether `put` of [`Value::Null`](anystore_core::Value::Null) writes an entry (`true`) or is skipped.
    pub store_none_values: bool,
    /// Driver options (table name, pool size, credentials, headers, ...).
    pub backend_config: BackendConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: ".anystore".to_string(),
            serialization_mode: Mode::Auto,
            raise_on_nonexist: true,
            default_ttl: 0,
            key_prefix: String::new(),
            readonly: false,
            store_none_values: true,
            backend_config: BackendConfig::new(),
        }
    }
}

impl StoreConfig {
    /// Default configuration pointing at `uri`.
    #[must_use]
    pub fn with_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// The default TTL as a duration, `None` when writes never expire.
    #[must_use]
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl > 0).then(|| Duration::from_secs(self.default_ttl))
    }

    /// Deserializes a driver option struct from [`StoreConfig::backend_config`].
    ///
    /// Unknown entries are ignored so one map can carry options for several
    /// drivers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidUri`] if a known option has the wrong type.
    pub fn backend_options<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(serde_json::Value::Object(self.backend_config.clone())).map_err(
            |e| StoreError::InvalidUri {
                uri: self.uri.clone(),
                reason: format!("backend_config: {e}"),
            },
        )
    }

    /// Parses a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StoreError::serialization("json", e))
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is malformed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::backend("fs", e))?;
        tracing::debug!(path = %path.display(), "loaded store config");
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.uri, ".anystore");
        assert_eq!(config.serialization_mode, Mode::Auto);
        assert!(config.raise_on_nonexist);
        assert_eq!(config.default_ttl(), None);
        assert!(!config.readonly);
        assert!(config.store_none_values);
        assert!(config.backend_config.is_empty());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = StoreConfig::from_json_str(
            r#"{"uri": "memory://", "serialization_mode": "json", "default_ttl": 60,
                "backend_config": {"table": "cache"}}"#,
        )
        .unwrap();
        assert_eq!(config.uri, "memory://");
        assert_eq!(config.serialization_mode, Mode::Json);
        assert_eq!(config.default_ttl(), Some(Duration::from_secs(60)));
        assert!(config.raise_on_nonexist);
        assert_eq!(config.backend_config["table"], "cache");
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        let err = StoreConfig::from_json_str("{uri").unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
        let err = StoreConfig::from_json_str(r#"{"serialization_mode": "yaml"}"#).unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{"readonly": true}"#).unwrap();
        let config = StoreConfig::from_json_file(&path).unwrap();
        assert!(config.readonly);
        assert!(StoreConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn backend_options_ignore_unknown_entries() {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Options {
            table: String,
        }
        let mut config = StoreConfig::with_uri("sqlite://");
        config.backend_config.insert("table".into(), "t".into());
        config.backend_config.insert("redis_prefix".into(), "p".into());
        let options: Options = config.backend_options().unwrap();
        assert_eq!(options.table, "t");

        config.backend_config.insert("table".into(), 5.into());
        assert!(config.backend_options::<Options>().is_err());
    }
}
