//! Redis-compatible [`Backend`] (Redis, Valkey, Kvrocks).
//!
//! Values are plain string keys named `{prefix}/{key}`. Expiry and pop use
//! native primitives (`SET .. PX`, `GETDEL`). Listing pages through `SCAN`.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anystore_core::error::{Result, StoreError};
use anystore_core::key::{join_key, strip_namespace, KeyFilter};
use parking_lot::Mutex;
use redis::{Client, Connection, RedisResult};
use serde::Deserialize;

use super::{Backend, BackendKind, BackendStat, ByteStream, KeyPage, KeyStream, PageCursor, PagedKeys};

/// `SCAN COUNT` hint.
const SCAN_COUNT: usize = 1000;
/// Bytes fetched per `GETRANGE` when streaming.
const CHUNK_SIZE: usize = 64 * 1024;

/// Options read from the `backend_config` map.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisOptions {
    /// Namespace for every key written by this store.
    pub redis_prefix: String,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            redis_prefix: "anystore".to_string(),
        }
    }
}

fn redis_err(e: redis::RedisError) -> StoreError {
    StoreError::backend("redis", e)
}

/// Escapes redis `MATCH` metacharacters.
fn escape_pattern(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Lazily established connection, shared by the backend and its streams.
struct SharedConnection {
    uri: String,
    client: Client,
    conn: Mutex<Option<Connection>>,
}

impl SharedConnection {
    /// Runs `f` on the connection, connecting first if needed.
    ///
    /// A dropped connection is discarded so the next call reconnects.
    fn run<T>(&self, f: impl FnOnce(&mut Connection) -> RedisResult<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            let conn = self.client.get_connection().map_err(redis_err)?;
            tracing::info!(uri = %self.uri, "redis connected");
            *guard = Some(conn);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(StoreError::backend("redis", anyhow::anyhow!("no connection")));
        };
        f(conn).map_err(|e| {
            if e.is_connection_dropped() || e.is_io_error() {
                *guard = None;
            }
            redis_err(e)
        })
    }
}

/// Redis key/value storage.
pub struct RedisBackend {
    uri: String,
    prefix: String,
    conn: Arc<SharedConnection>,
}

impl RedisBackend {
    /// Prepares a client for `uri`. The connection opens on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidUri`] if the URL is not a redis URL.
    pub fn open(uri: &str, options: RedisOptions) -> Result<Self> {
        let client = Client::open(uri).map_err(|e| StoreError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            uri: uri.to_string(),
            prefix: options.redis_prefix,
            conn: Arc::new(SharedConnection {
                uri: uri.to_string(),
                client,
                conn: Mutex::new(None),
            }),
        })
    }

    fn physical(&self, key: &str) -> String {
        join_key(&self.prefix, key)
    }
}

impl Backend for RedisBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let key = self.physical(key);
        self.conn
            .run(|c| redis::cmd("EXISTS").arg(&key).query::<bool>(c))
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let physical = self.physical(key);
        self.conn
            .run(|c| redis::cmd("GET").arg(&physical).query::<Option<Vec<u8>>>(c))?
            .ok_or_else(|| StoreError::does_not_exist(key))
    }

    fn read_stream(&self, key: &str) -> Result<ByteStream> {
        if !self.exists(key)? {
            return Err(StoreError::does_not_exist(key));
        }
        Ok(Box::new(RangeReader {
            conn: self.conn.clone(),
            key: self.physical(key),
            offset: 0,
            buffer: Vec::new(),
            pos: 0,
            done: false,
        }))
    }

    fn write(&self, key: &str, data: &[u8], ttl: Option<Duration>) -> Result<()> {
        let physical = self.physical(key);
        self.conn.run(|c| {
            let mut cmd = redis::cmd("SET");
            cmd.arg(&physical).arg(data);
            if let Some(ttl) = ttl.filter(|t| !t.is_zero()) {
                cmd.arg("PX").arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
            }
            cmd.query::<()>(c)
        })?;
        tracing::trace!(key, size = data.len(), "redis write");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let physical = self.physical(key);
        self.conn
            .run(|c| redis::cmd("GETDEL").arg(&physical).query::<Option<Vec<u8>>>(c))
    }

    fn list_keys(&self, filter: &KeyFilter) -> Result<KeyStream> {
        let physical_prefix = join_key(&self.prefix, filter.prefix());
        let pattern = if physical_prefix.is_empty() {
            "*".to_string()
        } else {
            format!("{}*", escape_pattern(&physical_prefix))
        };
        let conn = self.conn.clone();
        let namespace = self.prefix.clone();
        let fetch = move |cursor: &PageCursor| {
            let position: u64 = match cursor {
                PageCursor::At(pos) => pos.parse().unwrap_or_default(),
                PageCursor::Start | PageCursor::Finished => 0,
            };
            let (next, physical): (u64, Vec<String>) = conn.run(|c| {
                redis::cmd("SCAN")
                    .arg(position)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query(c)
            })?;
            let keys = physical
                .iter()
                .filter_map(|k| strip_namespace(&namespace, k).map(str::to_string))
                .collect();
            Ok(KeyPage {
                keys,
                next: if next == 0 {
                    PageCursor::Finished
                } else {
                    PageCursor::At(next.to_string())
                },
            })
        };
        Ok(Box::new(PagedKeys::new(filter.clone(), fetch)))
    }

    fn stat(&self, key: &str) -> Result<Option<BackendStat>> {
        let physical = self.physical(key);
        let (exists, size): (bool, u64) = self.conn.run(|c| {
            redis::pipe()
                .cmd("EXISTS")
                .arg(&physical)
                .cmd("STRLEN")
                .arg(&physical)
                .query(c)
        })?;
        Ok(exists.then_some(BackendStat {
            size,
            created_at: None,
            updated_at: None,
        }))
    }

    fn supports_ttl(&self) -> bool {
        true
    }

    fn pop_is_atomic(&self) -> bool {
        true
    }
}

/// Reads a value in `GETRANGE` chunks.
struct RangeReader {
    conn: Arc<SharedConnection>,
    key: String,
    offset: usize,
    buffer: Vec<u8>,
    pos: usize,
    done: bool,
}

impl Read for RangeReader {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.buffer.len() {
            if self.done {
                return Ok(0);
            }
            let start = self.offset;
            let end = start + CHUNK_SIZE - 1;
            let key = &self.key;
            let chunk: Vec<u8> = self
                .conn
                .run(|c| redis::cmd("GETRANGE").arg(key).arg(start).arg(end).query(c))
                .map_err(std::io::Error::other)?;
            self.done = chunk.len() < CHUNK_SIZE;
            self.offset += chunk.len();
            self.buffer = chunk;
            self.pos = 0;
        }
        let n = out.len().min(self.buffer.len() - self.pos);
        out[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
