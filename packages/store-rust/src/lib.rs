//! anystore: one key/value interface over filesystems, object storage, SQL
//! databases, redis, in-memory maps, zip archives and HTTP listings.
//!
//! Open a [`Store`] from a connection string, then read and write values:
//!
//! ```no_run
//! use anystore::{Store, Value};
//!
//! let store = Store::from_uri("memory://")?;
//! store.put("greeting", "hello")?;
//! assert_eq!(store.get("greeting")?, Value::from("hello"));
//! # Ok::<(), anystore::StoreError>(())
//! ```
//!
//! [`Memoizer`] caches function results in any store. [`mirror`] copies
//! keys between stores on a [`Worker`] pool, and the [`io`] helpers read and
//! write single locations such as `s3://bucket/file.txt` directly.

pub mod backend;
pub mod cache;
pub mod config;
pub mod io;
pub mod mirror;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod virtual_store;
pub mod worker;

pub use anystore_core::{
    ClockSource, Codec, ErrorKind, HashAlgorithm, KeyFilter, ManualClock, Mode, Result, Stats,
    StoreError, SystemClock, Value,
};
pub use backend::{Backend, BackendKind};
pub use cache::{CacheStats, CachedFn, Memoizer};
pub use config::StoreConfig;
pub use io::{smart_copy, smart_open, smart_read, smart_stream, smart_write};
pub use mirror::{mirror, MirrorOptions, MirrorReport};
pub use registry::StoreRegistry;
pub use resolver::{open_backend, resolve, ResolvedUri};
pub use store::{OpenMode, ReadOptions, Store, StoreHandle, WriteOptions};
pub use virtual_store::{open_virtual, VirtualStore};
pub use worker::Worker;
