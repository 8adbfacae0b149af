//! SQL [`Backend`] over `sqlx`'s `Any` driver (`SQLite`, `PostgreSQL`, `MySQL`).
//!
//! One row per key in a single table:
//!
//! | column       | type            |
//! |--------------|-----------------|
//! | `key`        | text, primary   |
//! | `value`      | binary          |
//! | `created_at` | bigint (millis) |
//! | `updated_at` | bigint (millis) |
//! | `expires_at` | bigint, null    |
//!
//! Expiry is native: reads filter on `expires_at`. Listing pages through the
//! table by key (keyset pagination) so arbitrarily large tables stream.

use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use anystore_core::clock::{expiry_from, ClockSource};
use anystore_core::error::{Result, StoreError};
use anystore_core::key::{join_key, strip_namespace, KeyFilter};
use serde::Deserialize;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{AnyPool, Row};

use super::runtime::BlockingRuntime;
use super::{Backend, BackendKind, BackendStat, KeyPage, KeyStream, PageCursor, PagedKeys};

/// Rows fetched per listing page.
const PAGE_SIZE: i64 = 1000;

static INSTALL_DRIVERS: Once = Once::new();

/// Options read from the `backend_config` map.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqlOptions {
    /// Table holding the entries.
    pub table: String,
    /// Namespace prepended to every key stored through this driver.
    pub key_prefix: String,
    /// Maximum pool connections.
    pub pool_size: u32,
}

impl Default for SqlOptions {
    fn default() -> Self {
        Self {
            table: "anystore".to_string(),
            key_prefix: String::new(),
            pool_size: 5,
        }
    }
}

/// Statement flavor per database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl Dialect {
    /// Detects the dialect from a connection string scheme.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnsupportedBackend`] for other databases.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let scheme = uri.split(':').next().unwrap_or_default().to_ascii_lowercase();
        let base = scheme.split('+').next().unwrap_or_default();
        match base {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            _ => Err(StoreError::UnsupportedBackend {
                scheme,
                reason: "only sqlite, postgres and mysql are supported".to_string(),
            }),
        }
    }

    /// `key` is reserved in MySQL.
    fn key_column(self) -> &'static str {
        match self {
            Self::Mysql => "`key`",
            Self::Sqlite | Self::Postgres => "key",
        }
    }

    fn param(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${n}"),
            Self::Sqlite | Self::Mysql => "?".to_string(),
        }
    }

    fn create_table(self, table: &str) -> String {
        let (key_type, blob_type) = match self {
            Self::Sqlite => ("TEXT", "BLOB"),
            Self::Postgres => ("TEXT", "BYTEA"),
            Self::Mysql => ("VARCHAR(767)", "LONGBLOB"),
        };
        let key = self.key_column();
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             {key} {key_type} NOT NULL PRIMARY KEY, \
             value {blob_type}, \
             created_at BIGINT NOT NULL, \
             updated_at BIGINT NOT NULL, \
             expires_at BIGINT)"
        )
    }

    fn upsert(self, table: &str) -> String {
        let p = |n| self.param(n);
        let key = self.key_column();
        let insert = format!(
            "INSERT INTO {table} ({key}, value, created_at, updated_at, expires_at) \
             VALUES ({}, {}, {}, {}, {})",
            p(1),
            p(2),
            p(3),
            p(4),
            p(5)
        );
        match self {
            Self::Sqlite | Self::Postgres => format!(
                "{insert} ON CONFLICT ({key}) DO UPDATE SET value = excluded.value, \
                 updated_at = excluded.updated_at, expires_at = excluded.expires_at"
            ),
            Self::Mysql => format!(
                "{insert} ON DUPLICATE KEY UPDATE value = VALUES(value), \
                 updated_at = VALUES(updated_at), expires_at = VALUES(expires_at)"
            ),
        }
    }

    /// `AND <row is live>` clause using parameter `n` for "now".
    fn live(self, n: usize) -> String {
        format!("(expires_at IS NULL OR expires_at > {})", self.param(n))
    }
}

/// Escapes `LIKE` wildcards using `!` as escape character.
fn like_prefix(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '!') {
            out.push('!');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Rewrites `dialect+driver://` schemes into the plain form sqlx expects.
fn connection_url(dialect: Dialect, uri: &str) -> String {
    let rest = uri.split_once(':').map_or("", |(_, rest)| rest);
    match dialect {
        Dialect::Sqlite => sqlite_url(&format!("sqlite:{rest}")),
        Dialect::Postgres => format!("postgres:{rest}"),
        Dialect::Mysql => format!("mysql:{rest}"),
    }
}

/// Adds `mode=rwc` to `SQLite` file URLs so missing databases get created.
fn sqlite_url(uri: &str) -> String {
    if uri.contains(":memory:") || uri.contains("mode=") {
        uri.to_string()
    } else if uri.contains('?') {
        format!("{uri}&mode=rwc")
    } else {
        format!("{uri}?mode=rwc")
    }
}

/// In-memory and unnamed `SQLite` databases are private to one connection.
fn is_private_sqlite(url: &str) -> bool {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return false;
    };
    let path = rest
        .trim_start_matches('/')
        .split('?')
        .next()
        .unwrap_or_default();
    path.is_empty() || path.contains(":memory:") || rest.contains("mode=memory")
}

fn sql_err(e: sqlx::Error) -> StoreError {
    StoreError::backend("sql", e)
}

/// SQL table storage.
pub struct SqlBackend {
    uri: String,
    dialect: Dialect,
    options: SqlOptions,
    pool: AnyPool,
    runtime: BlockingRuntime,
    clock: Arc<dyn ClockSource>,
}

impl SqlBackend {
    /// Connects to `uri` and creates the table if missing.
    ///
    /// # Errors
    ///
    /// Fails for unknown dialects, invalid table names, and connection or
    /// DDL errors.
    pub fn connect(uri: &str, options: SqlOptions, clock: Arc<dyn ClockSource>) -> Result<Self> {
        let dialect = Dialect::from_uri(uri)?;
        if options.table.is_empty()
            || !options
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(StoreError::InvalidUri {
                uri: uri.to_string(),
                reason: format!("invalid table name `{}`", options.table),
            });
        }
        INSTALL_DRIVERS.call_once(install_default_drivers);

        let url = connection_url(dialect, uri);
        let max_connections = if is_private_sqlite(&url) {
            1
        } else {
            options.pool_size.max(1)
        };
        let runtime = BlockingRuntime::new("sql")?;
        let pool = runtime.block_on(async {
            let pool = AnyPoolOptions::new()
                .max_connections(max_connections)
                .connect(&url)
                .await?;
            sqlx::query(&dialect.create_table(&options.table))
                .execute(&pool)
                .await?;
            Ok::<_, sqlx::Error>(pool)
        });
        let pool = pool.map_err(sql_err)?;
        tracing::info!(dialect = ?dialect, table = %options.table, "sql store connected");
        Ok(Self {
            uri: uri.to_string(),
            dialect,
            options,
            pool,
            runtime,
            clock,
        })
    }

    fn physical(&self, key: &str) -> String {
        join_key(&self.options.key_prefix, key)
    }

    fn fetch_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let sql = format!(
            "SELECT value FROM {} WHERE {} = {} AND {}",
            self.options.table,
            self.dialect.key_column(),
            self.dialect.param(1),
            self.dialect.live(2)
        );
        let key = self.physical(key);
        let now = self.clock.now_millis();
        let row = self
            .runtime
            .block_on(
                sqlx::query(&sql)
                    .bind(key)
                    .bind(now)
                    .fetch_optional(&self.pool),
            )
            .map_err(sql_err)?;
        row.map(|r| r.try_get::<Option<Vec<u8>>, _>(0).map(Option::unwrap_or_default))
            .transpose()
            .map_err(sql_err)
    }
}

impl Backend for SqlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sql
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.stat(key)?.is_some())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.fetch_value(key)?
            .ok_or_else(|| StoreError::does_not_exist(key))
    }

    fn write(&self, key: &str, data: &[u8], ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now_millis();
        let expires_at = ttl.and_then(|ttl| expiry_from(now, ttl));
        let sql = self.dialect.upsert(&self.options.table);
        self.runtime
            .block_on(
                sqlx::query(&sql)
                    .bind(self.physical(key))
                    .bind(data.to_vec())
                    .bind(now)
                    .bind(now)
                    .bind(expires_at)
                    .execute(&self.pool),
            )
            .map_err(sql_err)?;
        tracing::trace!(key, size = data.len(), "sql write");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let previous = self.fetch_value(key)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.options.table,
            self.dialect.key_column(),
            self.dialect.param(1)
        );
        self.runtime
            .block_on(sqlx::query(&sql).bind(self.physical(key)).execute(&self.pool))
            .map_err(sql_err)?;
        Ok(previous)
    }

    fn list_keys(&self, filter: &KeyFilter) -> Result<KeyStream> {
        let d = self.dialect;
        let k = d.key_column();
        let sql = format!(
            "SELECT {k} FROM {} WHERE {k} > {} AND {k} LIKE {} ESCAPE '!' AND {} \
             ORDER BY {k} LIMIT {PAGE_SIZE}",
            self.options.table,
            d.param(1),
            d.param(2),
            d.live(3)
        );
        let namespace = self.options.key_prefix.clone();
        let pattern = like_prefix(&join_key(&namespace, filter.prefix()));
        let pool = self.pool.clone();
        let runtime = self.runtime.clone();
        let clock = self.clock.clone();
        let page_len = usize::try_from(PAGE_SIZE).unwrap_or(usize::MAX);

        let fetch = move |cursor: &PageCursor| {
            let after = match cursor {
                PageCursor::At(last) => last.clone(),
                PageCursor::Start | PageCursor::Finished => String::new(),
            };
            let rows = runtime
                .block_on(
                    sqlx::query(&sql)
                        .bind(after)
                        .bind(pattern.clone())
                        .bind(clock.now_millis())
                        .fetch_all(&pool),
                )
                .map_err(sql_err)?;
            let physical: Vec<String> = rows
                .iter()
                .map(|r| r.try_get::<String, _>(0))
                .collect::<std::result::Result<_, _>>()
                .map_err(sql_err)?;
            let next = match physical.last() {
                Some(last) if physical.len() == page_len => PageCursor::At(last.clone()),
                _ => PageCursor::Finished,
            };
            let keys = physical
                .iter()
                .filter_map(|k| strip_namespace(&namespace, k).map(str::to_string))
                .collect();
            Ok(KeyPage { keys, next })
        };
        Ok(Box::new(PagedKeys::new(filter.clone(), fetch)))
    }

    fn stat(&self, key: &str) -> Result<Option<BackendStat>> {
        let d = self.dialect;
        let length = match d {
            Dialect::Postgres => "octet_length(value)",
            Dialect::Sqlite | Dialect::Mysql => "length(value)",
        };
        let sql = format!(
            "SELECT CAST({length} AS BIGINT), created_at, updated_at FROM {} \
             WHERE {} = {} AND {}",
            self.options.table,
            d.key_column(),
            d.param(1),
            d.live(2)
        );
        // MySQL casts to SIGNED rather than BIGINT.
        let sql = if d == Dialect::Mysql {
            sql.replace("AS BIGINT", "AS SIGNED")
        } else {
            sql
        };
        let row = self
            .runtime
            .block_on(
                sqlx::query(&sql)
                    .bind(self.physical(key))
                    .bind(self.clock.now_millis())
                    .fetch_optional(&self.pool),
            )
            .map_err(sql_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let size: Option<i64> = row.try_get(0).map_err(sql_err)?;
        Ok(Some(BackendStat {
            size: u64::try_from(size.unwrap_or_default()).unwrap_or_default(),
            created_at: row.try_get(1).map_err(sql_err)?,
            updated_at: row.try_get(2).map_err(sql_err)?,
        }))
    }

    fn supports_ttl(&self) -> bool {
        true
    }
}
