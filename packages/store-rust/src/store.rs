//! The [`Store`] façade: one value API over every backend.
//!
//! A store composes a [`Backend`] with a [`Codec`] and applies the same policy
//! everywhere: key normalization and namespacing, missing-key behavior,
//! read-only enforcement and TTL.
//!
//! # Expiry on backends without native TTL
//!
//! Filesystem, object storage and archive entries written with a TTL carry a
//! fixed header: [`EXPIRY_MAGIC`] followed by the absolute expiry as a
//! big-endian `i64` of milliseconds. The header is stripped on every read
//! path. Expired entries read as absent and are deleted lazily. Listing does
//! not read entries, so it may still yield keys that have expired.

use std::fmt;
use std::io::{self, BufRead, BufReader, Cursor, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use anystore_core::clock::{expiry_from, ClockSource, SystemClock};
use anystore_core::error::{Result, StoreError};
use anystore_core::hash::{checksum, HashAlgorithm};
use anystore_core::key::{join_key, normalize_key, normalize_prefix, strip_namespace, KeyFilter};
use anystore_core::serialize::{Codec, Mode};
use anystore_core::stats::Stats;
use anystore_core::value::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::{Backend, BackendKind, ByteStream, KeyStream};
use crate::config::StoreConfig;
use crate::resolver::open_backend;

/// Leading bytes of an entry that carries an emulated expiry.
pub const EXPIRY_MAGIC: &[u8; 14] = b"\xFFanystore:ttl\x00";
const EXPIRY_HEADER_LEN: usize = EXPIRY_MAGIC.len() + 8;

fn wrap_expiry(expires_at: i64, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(EXPIRY_HEADER_LEN + data.len());
    out.extend_from_slice(EXPIRY_MAGIC);
    out.extend_from_slice(&expires_at.to_be_bytes());
    out.extend_from_slice(data);
    out
}

/// Splits an emulated-expiry header off `data`.
fn split_expiry(data: &[u8]) -> Option<(i64, &[u8])> {
    let rest = data.strip_prefix(EXPIRY_MAGIC.as_slice())?;
    let (stamp, payload) = rest.split_first_chunk::<8>()?;
    Some((i64::from_be_bytes(*stamp), payload))
}

/// Writes `data`, using the backend's native expiry or the header envelope.
fn write_entry(
    backend: &dyn Backend,
    clock: &dyn ClockSource,
    key: &str,
    data: &[u8],
    ttl: Option<Duration>,
) -> Result<()> {
    match ttl.filter(|t| !t.is_zero()) {
        Some(ttl) if !backend.supports_ttl() => {
            let expires_at = expiry_from(clock.now_millis(), ttl).unwrap_or(i64::MAX);
            backend.write(key, &wrap_expiry(expires_at, data), None)
        }
        ttl => backend.write(key, data, ttl),
    }
}

/// Per-call overrides for read-class operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Overrides [`StoreConfig::raise_on_nonexist`].
    pub raise_on_nonexist: Option<bool>,
    /// Overrides the store's serialization mode.
    pub mode: Option<Mode>,
}

impl ReadOptions {
    /// Missing keys yield [`Value::Null`] (or `None`) instead of failing.
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            raise_on_nonexist: Some(false),
            mode: None,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Per-call overrides for writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Overrides [`StoreConfig::default_ttl`]. `Duration::ZERO` disables expiry.
    pub ttl: Option<Duration>,
    /// Overrides the store's serialization mode.
    pub mode: Option<Mode>,
}

impl WriteOptions {
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Direction of a handle returned by [`Store::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

impl OpenMode {
    /// Parses `r`/`rb` and `w`/`wb`.
    #[must_use]
    pub fn parse(flag: &str) -> Option<Self> {
        match flag {
            "r" | "rb" => Some(Self::Read),
            "w" | "wb" => Some(Self::Write),
            _ => None,
        }
    }
}

/// Key/value store over one backend.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Store {
    backend: Arc<dyn Backend>,
    config: StoreConfig,
    codec: Codec,
    clock: Arc<dyn ClockSource>,
    namespace: String,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("uri", &self.config.uri)
            .field("backend", &self.backend.kind())
            .field("namespace", &self.namespace)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Resolves `config.uri` and opens the matching backend.
    ///
    /// # Errors
    ///
    /// Fails if the URI is unsupported or the driver cannot be initialized.
    pub fn new(config: StoreConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Opens a store with default settings for `uri`.
    ///
    /// # Errors
    ///
    /// See [`Store::new`].
    pub fn from_uri(uri: &str) -> Result<Self> {
        Self::new(StoreConfig::with_uri(uri))
    }

    /// Like [`Store::new`], with an explicit time source for expiry.
    ///
    /// # Errors
    ///
    /// See [`Store::new`].
    pub fn with_clock(config: StoreConfig, clock: Arc<dyn ClockSource>) -> Result<Self> {
        let backend = open_backend(&config, clock.clone())?;
        Self::from_backend(backend, config, clock)
    }

    /// Wraps an already constructed backend. `config.uri` is informational.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] if `config.key_prefix` is invalid.
    pub fn from_backend(
        backend: Arc<dyn Backend>,
        config: StoreConfig,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self> {
        let namespace = normalize_prefix(&config.key_prefix)?;
        tracing::debug!(
            uri = %config.uri,
            backend = %backend.kind(),
            mode = %config.serialization_mode,
            "store opened"
        );
        Ok(Self {
            codec: Codec::new(config.serialization_mode),
            backend,
            config,
            clock,
            namespace,
        })
    }

    /// Replaces the codec, e.g. to install encode/decode overrides.
    #[must_use]
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Base URI of the store.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.config.uri
    }

    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.config.readonly
    }

    /// `true` if [`Store::pop`] reads and deletes in one backend primitive.
    ///
    /// Elsewhere a concurrent writer can slip in between the two steps.
    #[must_use]
    pub fn pop_is_atomic(&self) -> bool {
        self.backend.pop_is_atomic()
    }

    // --- Keys ---

    fn physical(&self, key: &str) -> Result<String> {
        Ok(join_key(&self.namespace, &normalize_key(key)?))
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.config.readonly {
            return Err(StoreError::ReadOnly {
                uri: self.config.uri.clone(),
            });
        }
        Ok(())
    }

    fn raise(&self, options: &ReadOptions) -> bool {
        options
            .raise_on_nonexist
            .unwrap_or(self.config.raise_on_nonexist)
    }

    fn ttl(&self, options: &WriteOptions) -> Option<Duration> {
        options.ttl.or_else(|| self.config.default_ttl())
    }

    fn emulates_ttl(&self) -> bool {
        !self.backend.supports_ttl()
    }

    // --- Raw bytes ---

    /// Deletes an expired entry. Failures only cost a later retry.
    fn purge(&self, physical: &str) {
        if self.config.readonly {
            return;
        }
        match self.backend.delete(physical) {
            Ok(_) => tracing::debug!(key = physical, "purged expired entry"),
            Err(e) => tracing::debug!(key = physical, error = %e, "purge of expired entry failed"),
        }
    }

    /// Strips the expiry header; `None` if the entry has expired.
    fn unwrap_entry(&self, physical: &str, data: Vec<u8>) -> Option<Vec<u8>> {
        if !self.emulates_ttl() {
            return Some(data);
        }
        match split_expiry(&data) {
            Some((expires_at, _)) if expires_at <= self.clock.now_millis() => {
                self.purge(physical);
                None
            }
            Some((_, payload)) => Some(payload.to_vec()),
            None => Some(data),
        }
    }

    /// Stored bytes of `key`, `None` when absent or expired.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let physical = self.physical(key)?;
        match self.backend.read(&physical) {
            Ok(data) => Ok(self.unwrap_entry(&physical, data)),
            Err(e) if e.is_missing() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Byte stream of `key` with any expiry header consumed.
    fn reader(&self, key: &str) -> Result<ByteStream> {
        let physical = self.physical(key)?;
        let mut stream = match self.backend.read_stream(&physical) {
            Ok(stream) => stream,
            Err(e) if e.is_missing() => return Err(StoreError::does_not_exist(key)),
            Err(e) => return Err(e),
        };
        if !self.emulates_ttl() {
            return Ok(stream);
        }
        let mut head = Vec::with_capacity(EXPIRY_HEADER_LEN);
        (&mut stream)
            .take(EXPIRY_HEADER_LEN as u64)
            .read_to_end(&mut head)
            .map_err(|e| StoreError::backend(self.kind().as_str(), e))?;
        match split_expiry(&head) {
            Some((expires_at, _)) if expires_at <= self.clock.now_millis() => {
                drop(stream);
                self.purge(&physical);
                Err(StoreError::does_not_exist(key))
            }
            Some(_) => Ok(stream),
            None => Ok(Box::new(Cursor::new(head).chain(stream))),
        }
    }

    fn missing<T: Default>(&self, key: &str, options: &ReadOptions) -> Result<T> {
        if self.raise(options) {
            Err(StoreError::does_not_exist(key))
        } else {
            Ok(T::default())
        }
    }

    // --- Values ---

    /// Reads and decodes `key` with the store defaults.
    ///
    /// # Errors
    ///
    /// [`StoreError::DoesNotExist`] if the key is absent and
    /// `raise_on_nonexist` is on; decoding and backend errors otherwise.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.get_with(key, &ReadOptions::default())
    }

    /// Reads and decodes `key`. A missing key yields [`Value::Null`] when
    /// raising is off.
    ///
    /// # Errors
    ///
    /// See [`Store::get`].
    pub fn get_with(&self, key: &str, options: &ReadOptions) -> Result<Value> {
        match self.load(key)? {
            Some(data) => self.codec.decode_with(&data, options.mode),
            None => self.missing(key, options),
        }
    }

    /// Reads `key`, `None` if absent, regardless of the raise policy.
    ///
    /// # Errors
    ///
    /// Decoding and backend errors.
    pub fn try_get(&self, key: &str) -> Result<Option<Value>> {
        self.load(key)?
            .map(|data| self.codec.decode(&data))
            .transpose()
    }

    /// Reads `key` into a typed model, validating it on the way.
    ///
    /// Returns `None` for a missing key when raising is off.
    ///
    /// # Errors
    ///
    /// [`StoreError::Serialization`] if the stored document does not match
    /// `T`; see also [`Store::get`].
    pub fn get_model<T: DeserializeOwned>(&self, key: &str, options: &ReadOptions) -> Result<Option<T>> {
        match self.load(key)? {
            Some(data) => self.codec.decode_typed(&data, options.mode).map(Some),
            None => self.missing(key, options),
        }
    }

    /// Encodes and writes `value` with the store defaults.
    ///
    /// # Errors
    ///
    /// [`StoreError::ReadOnly`], encoding and backend errors.
    pub fn put(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.put_with(key, &value.into(), &WriteOptions::default())
    }

    /// Encodes and writes `value`, replacing any previous entry.
    ///
    /// [`Value::Null`] is skipped when `store_none_values` is off.
    ///
    /// # Errors
    ///
    /// See [`Store::put`].
    pub fn put_with(&self, key: &str, value: &Value, options: &WriteOptions) -> Result<()> {
        self.ensure_writable()?;
        let physical = self.physical(key)?;
        if value.is_null() && !self.config.store_none_values {
            tracing::trace!(key, "skipping null value");
            return Ok(());
        }
        let data = self.codec.encode_with(value, options.mode)?;
        write_entry(
            self.backend.as_ref(),
            self.clock.as_ref(),
            &physical,
            &data,
            self.ttl(options),
        )?;
        tracing::trace!(key, size = data.len(), "put");
        Ok(())
    }

    /// Writes a typed model, validated by its serde implementation.
    ///
    /// # Errors
    ///
    /// See [`Store::put`].
    pub fn put_model<T: Serialize + ?Sized>(&self, key: &str, model: &T, options: &WriteOptions) -> Result<()> {
        self.ensure_writable()?;
        let physical = self.physical(key)?;
        let data = self.codec.encode_typed(model, options.mode)?;
        write_entry(
            self.backend.as_ref(),
            self.clock.as_ref(),
            &physical,
            &data,
            self.ttl(options),
        )
    }

    /// Removes `key` and returns its previous value.
    ///
    /// Atomic only where [`Store::pop_is_atomic`] says so.
    ///
    /// # Errors
    ///
    /// See [`Store::get`] and [`Store::delete`].
    pub fn pop(&self, key: &str) -> Result<Value> {
        self.pop_with(key, &ReadOptions::default())
    }

    /// [`Store::pop`] with per-call overrides.
    ///
    /// # Errors
    ///
    /// See [`Store::pop`].
    pub fn pop_with(&self, key: &str, options: &ReadOptions) -> Result<Value> {
        self.ensure_writable()?;
        let physical = self.physical(key)?;
        let previous = self
            .backend
            .delete(&physical)?
            .and_then(|data| self.unwrap_entry(&physical, data));
        match previous {
            Some(data) => self.codec.decode_with(&data, options.mode),
            None => self.missing(key, options),
        }
    }

    /// Removes `key`. Deleting an absent key is not an error.
    ///
    /// # Errors
    ///
    /// [`StoreError::ReadOnly`] and backend errors.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.ensure_writable()?;
        let physical = self.physical(key)?;
        self.backend.delete(&physical)?;
        tracing::trace!(key, "delete");
        Ok(())
    }

    /// `true` if `key` holds a live entry.
    ///
    /// # Errors
    ///
    /// Backend errors.
    pub fn exists(&self, key: &str) -> Result<bool> {
        if !self.emulates_ttl() {
            return self.backend.exists(&self.physical(key)?);
        }
        match self.reader(key) {
            Ok(_) => Ok(true),
            Err(e) if e.is_missing() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Stores the current time (milliseconds) at `key` and returns it.
    ///
    /// # Errors
    ///
    /// See [`Store::put`].
    pub fn touch(&self, key: &str) -> Result<i64> {
        let now = self.clock.now_millis();
        self.put(key, now)?;
        Ok(now)
    }

    // --- Streaming ---

    /// Lazily decodes `key` as newline-delimited records with the store mode.
    ///
    /// # Errors
    ///
    /// See [`Store::stream_with`].
    pub fn stream(&self, key: &str) -> Result<RecordStream> {
        self.stream_with(key, &ReadOptions::default())
    }

    /// Lazily decodes `key` as newline-delimited records. Each non-empty line
    /// is decoded on its own; a missing key yields nothing when raising is
    /// off.
    ///
    /// # Errors
    ///
    /// [`StoreError::DoesNotExist`] if the key is absent and raising is on.
    /// Per-record decoding errors are yielded by the iterator.
    pub fn stream_with(&self, key: &str, options: &ReadOptions) -> Result<RecordStream> {
        let lines = match self.reader(key) {
            Ok(stream) => Some(BufReader::new(stream).split(b'\n')),
            Err(e) if e.is_missing() && !self.raise(options) => None,
            Err(e) => return Err(e),
        };
        Ok(RecordStream {
            lines,
            codec: self.codec.clone(),
            mode: options.mode,
            backend: self.kind().as_str(),
        })
    }

    /// Opens a scoped byte handle on `key`.
    ///
    /// Reads stream from the backend. Writes are buffered and committed by
    /// [`StoreHandle::finish`], or on drop.
    ///
    /// # Errors
    ///
    /// [`StoreError::DoesNotExist`] when reading a missing key,
    /// [`StoreError::ReadOnly`] when writing to a read-only store.
    pub fn open(&self, key: &str, mode: OpenMode) -> Result<StoreHandle> {
        match mode {
            OpenMode::Read => Ok(StoreHandle::Read(self.reader(key)?)),
            OpenMode::Write => {
                self.ensure_writable()?;
                Ok(StoreHandle::Write(StoreWriter {
                    backend: self.backend.clone(),
                    clock: self.clock.clone(),
                    key: self.physical(key)?,
                    ttl: self.config.default_ttl(),
                    buffer: Vec::new(),
                    committed: false,
                }))
            }
        }
    }

    /// [`Store::open`] with a `rb`/`wb` flag.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotSupported`] for other flags; see [`Store::open`].
    pub fn open_flag(&self, key: &str, flag: &str) -> Result<StoreHandle> {
        let mode = OpenMode::parse(flag).ok_or(StoreError::NotSupported {
            operation: "open with this flag",
            backend: self.kind().as_str(),
        })?;
        self.open(key, mode)
    }

    /// Streaming content hash of the stored bytes of `key`.
    ///
    /// # Errors
    ///
    /// [`StoreError::DoesNotExist`] and read errors.
    pub fn checksum(&self, key: &str, algorithm: HashAlgorithm) -> Result<String> {
        checksum(self.reader(key)?, algorithm)
    }

    // --- Listing ---

    /// Lazily lists keys passing `filter`, with the key prefix stripped.
    ///
    /// Order is whatever the backend produces.
    ///
    /// # Errors
    ///
    /// Errors starting the listing; later failures are yielded by the stream.
    pub fn iterate_keys(&self, filter: &KeyFilter) -> Result<KeyStream> {
        let keys = self.backend.list_keys(&filter.scoped(&self.namespace))?;
        let namespace = self.namespace.clone();
        Ok(Box::new(keys.filter_map(move |key| match key {
            Ok(key) => strip_namespace(&namespace, &key).map(|k| Ok(k.to_string())),
            Err(e) => Some(Err(e)),
        })))
    }

    /// Shorthand for [`Store::iterate_keys`] with a prefix and a glob.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidKey`] for an invalid prefix or glob.
    pub fn keys(&self, prefix: Option<&str>, glob: Option<&str>) -> Result<KeyStream> {
        self.iterate_keys(&KeyFilter::from_parts(prefix, None, glob)?)
    }

    /// Lazily yields `(key, value)` for every key passing `filter`.
    ///
    /// Keys that vanish between listing and reading are skipped.
    ///
    /// # Errors
    ///
    /// See [`Store::iterate_keys`].
    pub fn iterate_values<'a>(
        &'a self,
        filter: &KeyFilter,
        options: ReadOptions,
    ) -> Result<impl Iterator<Item = Result<(String, Value)>> + 'a> {
        let keys = self.iterate_keys(filter)?;
        Ok(keys.filter_map(move |key| {
            let key = match key {
                Ok(key) => key,
                Err(e) => return Some(Err(e)),
            };
            match self.load(&key) {
                Ok(Some(data)) => Some(
                    self.codec
                        .decode_with(&data, options.mode)
                        .map(|value| (key, value)),
                ),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            }
        }))
    }

    /// Size and timestamps of `key`.
    ///
    /// # Errors
    ///
    /// [`StoreError::DoesNotExist`] if the key is absent or expired.
    pub fn info(&self, key: &str) -> Result<Stats> {
        let physical = self.physical(key)?;
        let stat = self
            .backend
            .stat(&physical)?
            .ok_or_else(|| StoreError::does_not_exist(key))?;
        let mut size = stat.size;
        if self.emulates_ttl() {
            let mut head = Vec::with_capacity(EXPIRY_HEADER_LEN);
            match self.backend.read_stream(&physical) {
                Ok(stream) => {
                    stream
                        .take(EXPIRY_HEADER_LEN as u64)
                        .read_to_end(&mut head)
                        .map_err(|e| StoreError::backend(self.kind().as_str(), e))?;
                }
                Err(e) if e.is_missing() => return Err(StoreError::does_not_exist(key)),
                Err(e) => return Err(e),
            }
            if let Some((expires_at, _)) = split_expiry(&head) {
                if expires_at <= self.clock.now_millis() {
                    self.purge(&physical);
                    return Err(StoreError::does_not_exist(key));
                }
                size = size.saturating_sub(EXPIRY_HEADER_LEN as u64);
            }
        }
        Ok(Stats::new(
            self.uri(),
            normalize_key(key)?,
            size,
            stat.created_at,
            stat.updated_at,
        ))
    }
}

/// Newline-delimited records decoded one line at a time.
pub struct RecordStream {
    lines: Option<io::Split<BufReader<ByteStream>>>,
    codec: Codec,
    mode: Option<Mode>,
    backend: &'static str,
}

impl Iterator for RecordStream {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let lines = self.lines.as_mut()?;
        loop {
            let mut line = match lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    self.lines = None;
                    return Some(Err(StoreError::backend(self.backend, e)));
                }
            };
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(self.codec.decode_with(&line, self.mode));
        }
    }
}

/// Buffered write side of a [`StoreHandle`].
pub struct StoreWriter {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn ClockSource>,
    key: String,
    ttl: Option<Duration>,
    buffer: Vec<u8>,
    committed: bool,
}

impl StoreWriter {
    fn commit(&mut self) -> Result<()> {
        self.committed = true;
        write_entry(
            self.backend.as_ref(),
            self.clock.as_ref(),
            &self.key,
            &self.buffer,
            self.ttl,
        )?;
        tracing::trace!(key = %self.key, size = self.buffer.len(), "handle committed");
        Ok(())
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = self.commit() {
                tracing::warn!(key = %self.key, error = %e, "write handle dropped without a successful commit");
            }
        }
    }
}

/// Scoped byte handle returned by [`Store::open`].
pub enum StoreHandle {
    Read(ByteStream),
    Write(StoreWriter),
}

impl StoreHandle {
    /// Commits a write handle and reports the outcome; closes a read handle.
    ///
    /// # Errors
    ///
    /// Backend errors from the final write.
    pub fn finish(self) -> Result<()> {
        match self {
            Self::Read(_) => Ok(()),
            Self::Write(mut writer) => writer.commit(),
        }
    }

    /// Discards a write handle without writing anything.
    pub fn abort(self) {
        if let Self::Write(mut writer) = self {
            writer.committed = true;
        }
    }
}

impl Read for StoreHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Read(stream) => stream.read(buf),
            Self::Write(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "handle was opened for writing",
            )),
        }
    }
}

impl Write for StoreHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Write(writer) => {
                writer.buffer.extend_from_slice(buf);
                Ok(buf.len())
            }
            Self::Read(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "handle was opened for reading",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
