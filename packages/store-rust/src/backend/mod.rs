//! Backend driver contract and cursor-based key paging.
//!
//! Defines [`Backend`], the innermost storage layer: bytes in, bytes out,
//! addressed by already-normalized keys. The [`Store`](crate::store::Store)
//! façade handles serialization, namespacing, TTL emulation and the
//! missing-key policy on top of it.
//!
//! Drivers whose listing API is paginated (SQL keyset queries, redis `SCAN`)
//! expose it through [`PagedKeys`], which turns a fetch-by-cursor function
//! into a lazy key iterator.

use std::fmt;
use std::io::{Cursor, Read};
use std::time::Duration;

use anystore_core::error::{Result, StoreError};
use anystore_core::key::KeyFilter;

pub mod fs;
pub mod memory;

#[cfg(feature = "archive")]
pub mod archive;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "object-store")]
pub mod object;
#[cfg(feature = "redis")]
pub mod redis;
#[cfg(feature = "sql")]
pub mod sql;
#[cfg(any(feature = "sql", feature = "object-store"))]
pub(crate) mod runtime;

/// Lazily produced value content.
pub type ByteStream = Box<dyn Read + Send>;

/// Lazily produced listing result.
pub type KeyStream = Box<dyn Iterator<Item = Result<String>> + Send>;

/// The closed set of backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Fs,
    Memory,
    Sql,
    Redis,
    ObjectStore,
    Archive,
    Http,
    Ssh,
}

impl BackendKind {
    /// Short name used in logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fs => "fs",
            Self::Memory => "memory",
            Self::Sql => "sql",
            Self::Redis => "redis",
            Self::ObjectStore => "object-store",
            Self::Archive => "archive",
            Self::Http => "http",
            Self::Ssh => "ssh",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical metadata of one stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendStat {
    pub size: u64,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

/// Uniform byte-level storage contract.
///
/// Keys passed to a driver are normalized (see
/// [`normalize_key`](anystore_core::key::normalize_key)) and already carry
/// the store's namespace. Implementations must be safe for concurrent use
/// through a shared reference; last write wins per key.
pub trait Backend: Send + Sync + 'static {
    /// Which variant this is.
    fn kind(&self) -> BackendKind;

    /// Base URI this driver was opened with.
    fn uri(&self) -> &str;

    /// Whether a live entry exists at `key`.
    fn exists(&self, key: &str) -> Result<bool>;

    /// Reads the full content at `key`.
    ///
    /// Fails with [`StoreError::DoesNotExist`] if absent.
    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Opens the content at `key` for incremental reading.
    ///
    /// Each call starts from the beginning. The default buffers the whole
    /// value; drivers with a native streaming primitive override it.
    fn read_stream(&self, key: &str) -> Result<ByteStream> {
        Ok(Box::new(Cursor::new(self.read(key)?)))
    }

    /// Writes `data` at `key`, replacing any previous content.
    ///
    /// `ttl` is only passed to drivers that report [`supports_ttl`].
    ///
    /// [`supports_ttl`]: Backend::supports_ttl
    fn write(&self, key: &str, data: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Removes `key`, returning the previous content if there was any.
    fn delete(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Lists keys accepted by `filter`, lazily and in backend-native order.
    fn list_keys(&self, filter: &KeyFilter) -> Result<KeyStream>;

    /// Size and timestamps for `key`, or `None` if absent.
    fn stat(&self, key: &str) -> Result<Option<BackendStat>>;

    /// Whether the medium expires entries itself.
    fn supports_ttl(&self) -> bool {
        false
    }

    /// Whether [`delete`](Backend::delete) reads and removes in one
    /// indivisible step, so concurrent pops never return the same value twice.
    fn pop_is_atomic(&self) -> bool {
        false
    }
}

/// Error for write-class calls on drivers that cannot write.
pub(crate) fn not_supported(operation: &'static str, kind: BackendKind) -> StoreError {
    StoreError::NotSupported {
        operation,
        backend: kind.as_str(),
    }
}

// ---- Cursor paging ----

/// Opaque resume position for a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// Before the first page.
    Start,
    /// Driver-specific resume token (last key, scan cursor, ...).
    At(String),
    /// No more pages.
    Finished,
}

/// One page of keys plus the cursor for the next call.
#[derive(Debug)]
pub struct KeyPage {
    pub keys: Vec<String>,
    pub next: PageCursor,
}

/// Lazy iterator over a paginated listing.
///
/// Calls `fetch` with the current cursor whenever its buffer runs dry, and
/// drops keys rejected by `filter`. A fetch error is yielded once and ends
/// the iteration.
pub struct PagedKeys<F> {
    fetch: F,
    filter: KeyFilter,
    cursor: PageCursor,
    buffer: std::vec::IntoIter<String>,
}

impl<F> PagedKeys<F>
where
    F: FnMut(&PageCursor) -> Result<KeyPage> + Send,
{
    /// Creates an iterator positioned before the first page.
    pub fn new(filter: KeyFilter, fetch: F) -> Self {
        Self {
            fetch,
            filter,
            cursor: PageCursor::Start,
            buffer: Vec::new().into_iter(),
        }
    }
}

impl<F> Iterator for PagedKeys<F>
where
    F: FnMut(&PageCursor) -> Result<KeyPage> + Send,
{
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            for key in self.buffer.by_ref() {
                if self.filter.matches(&key) {
                    return Some(Ok(key));
                }
            }
            if self.cursor == PageCursor::Finished {
                return None;
            }
            match (self.fetch)(&self.cursor) {
                Ok(page) => {
                    self.cursor = page.next;
                    self.buffer = page.keys.into_iter();
                }
                Err(err) => {
                    self.cursor = PageCursor::Finished;
                    return Some(Err(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages() -> Vec<Vec<&'static str>> {
        vec![vec!["a/1", "b/1"], vec![], vec!["a/2"]]
    }

    #[test]
    fn paged_keys_walks_all_pages() {
        let data = pages();
        let filter = KeyFilter::new().with_prefix("a").unwrap();
        let keys: Vec<String> = PagedKeys::new(filter, move |cursor: &PageCursor| {
            let index = match cursor {
                PageCursor::Start => 0,
                PageCursor::At(i) => i.parse::<usize>().unwrap(),
                PageCursor::Finished => unreachable!(),
            };
            let next = if index + 1 < data.len() {
                PageCursor::At((index + 1).to_string())
            } else {
                PageCursor::Finished
            };
            Ok(KeyPage {
                keys: data[index].iter().map(ToString::to_string).collect(),
                next,
            })
        })
        .collect::<Result<_>>()
        .unwrap();
        assert_eq!(keys, vec!["a/1", "a/2"]);
    }

    #[test]
    fn paged_keys_stops_after_error() {
        let mut iter = PagedKeys::new(KeyFilter::new(), |_: &PageCursor| {
            Err(StoreError::backend("test", anyhow::anyhow!("down")))
        });
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn kind_names() {
        assert_eq!(BackendKind::ObjectStore.to_string(), "object-store");
        assert_eq!(BackendKind::Fs.as_str(), "fs");
    }
}
