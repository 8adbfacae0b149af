//! Connection string dispatch.
//!
//! [`resolve`] only classifies a URI; [`open_backend`] builds the driver and
//! lets it deserialize its own options from `backend_config`. Schemes whose
//! driver is compiled out fail with [`StoreError::UnsupportedBackend`] naming
//! the cargo feature to enable.

use std::path::PathBuf;
use std::sync::Arc;

use anystore_core::clock::ClockSource;
use anystore_core::error::{Result, StoreError};

use crate::backend::fs::FsBackend;
use crate::backend::memory::MemoryBackend;
use crate::backend::{Backend, BackendKind};
use crate::config::StoreConfig;

/// Schemes handled by the object storage driver.
const OBJECT_SCHEMES: &[&str] = &["s3", "s3a", "gs", "gcs", "az", "azure", "abfs", "abfss", "adl"];

/// Outcome of classifying a connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUri {
    /// Driver that handles the URI.
    pub kind: BackendKind,
    /// The connection string as given (trimmed).
    pub uri: String,
    /// Local path for `fs` and `archive`, otherwise the URI itself.
    pub path: String,
}

/// Lowercased scheme of `uri`, `None` for bare paths.
///
/// `sqlite:` is also recognized without slashes (`sqlite::memory:`,
/// `sqlite:data.db`).
fn scheme_of(uri: &str) -> Option<String> {
    let sqlite = uri.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("sqlite:"));
    if sqlite && uri.len() > 7 && !uri.contains("://") {
        return Some("sqlite".to_string());
    }
    let (scheme, _) = uri.split_once("://")?;
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then(|| scheme.to_ascii_lowercase())
}

fn is_archive_path(path: &str) -> bool {
    std::path::Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Classifies `uri`.
///
/// - no scheme, or `file://`: filesystem, unless the path ends in `.zip`
/// - `zip://PATH`: archive
/// - `memory://`: in-process map
/// - `redis://`, `rediss://`: redis
/// - any scheme mentioning `sql`, plus `postgres` and `mariadb`: SQL
/// - `s3`, `gs`/`gcs`, `az`/`azure`/`abfs(s)`/`adl`: object storage
/// - `http`, `https`: read-only HTTP
/// - `ssh`, `sftp`: recognized, no driver
///
/// # Errors
///
/// Returns [`StoreError::UnsupportedBackend`] for unknown schemes and
/// [`StoreError::InvalidUri`] for an empty string.
pub fn resolve(uri: &str) -> Result<ResolvedUri> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(StoreError::InvalidUri {
            uri: String::new(),
            reason: "empty connection string".to_string(),
        });
    }
    let resolved = |kind: BackendKind, path: &str| ResolvedUri {
        kind,
        uri: uri.to_string(),
        path: path.to_string(),
    };
    let Some(scheme) = scheme_of(uri) else {
        let kind = if is_archive_path(uri) {
            BackendKind::Archive
        } else {
            BackendKind::Fs
        };
        return Ok(resolved(kind, uri));
    };
    let rest = uri.split_once("://").map_or("", |(_, rest)| rest);
    let kind = match scheme.as_str() {
        "file" if is_archive_path(rest) => return Ok(resolved(BackendKind::Archive, rest)),
        "file" => return Ok(resolved(BackendKind::Fs, rest)),
        "zip" => return Ok(resolved(BackendKind::Archive, rest)),
        "memory" => BackendKind::Memory,
        "redis" | "rediss" => BackendKind::Redis,
        "http" | "https" => BackendKind::Http,
        "ssh" | "sftp" => BackendKind::Ssh,
        s if s.contains("sql") || s.starts_with("postgres") || s.starts_with("mariadb") => {
            BackendKind::Sql
        }
        s if OBJECT_SCHEMES.contains(&s) => BackendKind::ObjectStore,
        _ => {
            return Err(StoreError::UnsupportedBackend {
                scheme,
                reason: "no driver handles this scheme".to_string(),
            })
        }
    };
    Ok(resolved(kind, uri))
}

/// Resolves `config.uri` and builds the matching driver.
///
/// `clock` drives native expiry in the memory and SQL drivers.
///
/// # Errors
///
/// Propagates [`resolve`] errors, option deserialization errors and driver
/// construction failures.
pub fn open_backend(config: &StoreConfig, clock: Arc<dyn ClockSource>) -> Result<Arc<dyn Backend>> {
    let resolved = resolve(&config.uri)?;
    tracing::debug!(uri = %resolved.uri, kind = %resolved.kind, "opening backend");
    match resolved.kind {
        BackendKind::Fs => Ok(Arc::new(FsBackend::new(
            &resolved.uri,
            PathBuf::from(&resolved.path),
        )?)),
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::with_clock(clock))),
        BackendKind::Sql => open_sql(config, &resolved, clock),
        BackendKind::Redis => open_redis(config, &resolved),
        BackendKind::ObjectStore => open_object(config, &resolved),
        BackendKind::Archive => open_archive(&resolved),
        BackendKind::Http => open_http(config, &resolved),
        BackendKind::Ssh => Err(unsupported(
            &resolved,
            "ssh transfer is recognized but no driver is available".to_string(),
        )),
    }
}

fn unsupported(resolved: &ResolvedUri, reason: String) -> StoreError {
    StoreError::UnsupportedBackend {
        scheme: resolved.uri.split("://").next().unwrap_or_default().to_string(),
        reason,
    }
}

#[cfg(feature = "sql")]
fn open_sql(
    config: &StoreConfig,
    resolved: &ResolvedUri,
    clock: Arc<dyn ClockSource>,
) -> Result<Arc<dyn Backend>> {
    use crate::backend::sql::{SqlBackend, SqlOptions};
    let options: SqlOptions = config.backend_options()?;
    Ok(Arc::new(SqlBackend::connect(&resolved.uri, options, clock)?))
}

#[cfg(not(feature = "sql"))]
fn open_sql(
    _config: &StoreConfig,
    resolved: &ResolvedUri,
    _clock: Arc<dyn ClockSource>,
) -> Result<Arc<dyn Backend>> {
    Err(unsupported(resolved, "built without the `sql` feature".to_string()))
}

#[cfg(feature = "redis")]
fn open_redis(config: &StoreConfig, resolved: &ResolvedUri) -> Result<Arc<dyn Backend>> {
    use crate::backend::redis::{RedisBackend, RedisOptions};
    let options: RedisOptions = config.backend_options()?;
    Ok(Arc::new(RedisBackend::open(&resolved.uri, options)?))
}

#[cfg(not(feature = "redis"))]
fn open_redis(_config: &StoreConfig, resolved: &ResolvedUri) -> Result<Arc<dyn Backend>> {
    Err(unsupported(resolved, "built without the `redis` feature".to_string()))
}

#[cfg(feature = "object-store")]
fn open_object(config: &StoreConfig, resolved: &ResolvedUri) -> Result<Arc<dyn Backend>> {
    use crate::backend::object::{object_store_options, ObjectBackend};
    let options = object_store_options(&config.backend_config);
    Ok(Arc::new(ObjectBackend::open(&resolved.uri, options)?))
}

#[cfg(not(feature = "object-store"))]
fn open_object(_config: &StoreConfig, resolved: &ResolvedUri) -> Result<Arc<dyn Backend>> {
    Err(unsupported(resolved, "built without the `object-store` feature".to_string()))
}

#[cfg(feature = "archive")]
fn open_archive(resolved: &ResolvedUri) -> Result<Arc<dyn Backend>> {
    use crate::backend::archive::ArchiveBackend;
    Ok(Arc::new(ArchiveBackend::new(
        &resolved.uri,
        PathBuf::from(&resolved.path),
    )))
}

#[cfg(not(feature = "archive"))]
fn open_archive(resolved: &ResolvedUri) -> Result<Arc<dyn Backend>> {
    Err(unsupported(resolved, "built without the `archive` feature".to_string()))
}

#[cfg(feature = "http")]
fn open_http(config: &StoreConfig, resolved: &ResolvedUri) -> Result<Arc<dyn Backend>> {
    use crate::backend::http::{HttpBackend, HttpOptions};
    let options: HttpOptions = config.backend_options()?;
    Ok(Arc::new(HttpBackend::new(&resolved.uri, &options)?))
}

#[cfg(not(feature = "http"))]
fn open_http(_config: &StoreConfig, resolved: &ResolvedUri) -> Result<Arc<dyn Backend>> {
    Err(unsupported(resolved, "built without the `http` feature".to_string()))
}

#[cfg(test)]
mod tests {
    use anystore_core::clock::SystemClock;

    use super::*;

    fn kind(uri: &str) -> BackendKind {
        resolve(uri).unwrap().kind
    }

    #[test]
    fn bare_paths_are_filesystem() {
        assert_eq!(kind("./data"), BackendKind::Fs);
        assert_eq!(kind("/var/lib/store"), BackendKind::Fs);
        assert_eq!(kind(".anystore"), BackendKind::Fs);
        let resolved = resolve("file:///tmp/store").unwrap();
        assert_eq!(resolved.kind, BackendKind::Fs);
        assert_eq!(resolved.path, "/tmp/store");
    }

    #[test]
    fn archives_by_scheme_or_extension() {
        assert_eq!(kind("data/bundle.zip"), BackendKind::Archive);
        assert_eq!(kind("file:///tmp/bundle.ZIP"), BackendKind::Archive);
        let resolved = resolve("zip:///tmp/x.bin").unwrap();
        assert_eq!(resolved.kind, BackendKind::Archive);
        assert_eq!(resolved.path, "/tmp/x.bin");
    }

    #[test]
    fn scheme_dispatch() {
        assert_eq!(kind("memory://"), BackendKind::Memory);
        assert_eq!(kind("redis://localhost:6379"), BackendKind::Redis);
        assert_eq!(kind("rediss://cache.example.org"), BackendKind::Redis);
        assert_eq!(kind("sqlite:///tmp/x.db"), BackendKind::Sql);
        assert_eq!(kind("sqlite::memory:"), BackendKind::Sql);
        assert_eq!(kind("sqlite:data.db"), BackendKind::Sql);
        assert_eq!(kind("postgresql://u@h/db"), BackendKind::Sql);
        assert_eq!(kind("postgres://u@h/db"), BackendKind::Sql);
        assert_eq!(kind("mysql+pymysql://u@h/db"), BackendKind::Sql);
        assert_eq!(kind("S3://bucket/prefix"), BackendKind::ObjectStore);
        assert_eq!(kind("gcs://bucket"), BackendKind::ObjectStore);
        assert_eq!(kind("az://container/path"), BackendKind::ObjectStore);
        assert_eq!(kind("https://example.org/files/"), BackendKind::Http);
        assert_eq!(kind("sftp://host/path"), BackendKind::Ssh);
    }

    #[test]
    fn unknown_scheme_is_unsupported() {
        let err = resolve("ftp://host/x").unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnsupportedBackend { ref scheme, .. } if scheme == "ftp"
        ));
        assert!(matches!(resolve("  ").unwrap_err(), StoreError::InvalidUri { .. }));
    }

    #[test]
    fn ssh_has_no_driver() {
        let config = StoreConfig::with_uri("ssh://host/data");
        let err = open_backend(&config, Arc::new(SystemClock)).err().unwrap();
        assert!(matches!(err, StoreError::UnsupportedBackend { .. }));
    }

    #[test]
    fn opens_local_drivers() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::with_uri(dir.path().join("store").display().to_string());
        let backend = open_backend(&config, Arc::new(SystemClock)).unwrap();
        assert_eq!(backend.kind(), BackendKind::Fs);

        let backend = open_backend(&StoreConfig::with_uri("memory://"), Arc::new(SystemClock)).unwrap();
        assert_eq!(backend.kind(), BackendKind::Memory);
    }

    #[cfg(feature = "sql")]
    #[test]
    fn sql_options_come_from_backend_config() {
        let mut config = StoreConfig::with_uri("sqlite://:memory:");
        config.backend_config.insert("table".into(), "bad table!".into());
        let err = open_backend(&config, Arc::new(SystemClock)).err().unwrap();
        assert!(matches!(err, StoreError::InvalidUri { .. }));
    }

    #[cfg(feature = "sql")]
    #[test]
    fn sqlite_memory_uri_opens_one_shared_database() {
        let store = crate::store::Store::from_uri("sqlite::memory:").unwrap();
        assert_eq!(store.kind(), BackendKind::Sql);
        for i in 0..10 {
            store.put(&format!("k/{i}"), i).unwrap();
        }
        for i in 0..10 {
            assert_eq!(store.get(&format!("k/{i}")).unwrap(), anystore_core::value::Value::from(i));
        }
    }
}
