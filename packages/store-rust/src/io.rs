//! Read and write whole locations (`s3://bucket/dir/file.txt`, `./data.json`,
//! `-` for stdin/stdout) without opening a [`Store`] by hand.
//!
//! A location is split at its last `/` into the store URI and the key inside
//! that store. Values are plain bytes; no serialization mode applies.

use std::io::{self, BufRead, BufReader, Read, StdinLock, StdoutLock, Write};

use anystore_core::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::store::{OpenMode, Store, StoreHandle};

/// Location naming stdin (for reading) or stdout (for writing).
pub const STDIO: &str = "-";

const LOG_CHUNK: usize = 10_000;

/// Splits a location into the store holding it and the key inside that store.
#[must_use]
pub fn split_location(location: &str) -> (String, String) {
    let (base, rest) = match location.split_once("://") {
        Some((scheme, rest)) => (format!("{scheme}://"), rest),
        None => (String::new(), location),
    };
    match rest.rsplit_once('/') {
        Some(("", key)) if base.is_empty() => ("/".to_string(), key.to_string()),
        Some((dir, key)) => (format!("{base}{dir}"), key.to_string()),
        None if base.is_empty() => (".".to_string(), rest.to_string()),
        None => (base, rest.to_string()),
    }
}

/// Byte handle on a location, see [`smart_open`].
pub enum SmartHandle {
    Stdin(StdinLock<'static>),
    Stdout(StdoutLock<'static>),
    Store(StoreHandle),
}

impl SmartHandle {
    /// Flushes stdout or commits a store write handle.
    ///
    /// # Errors
    ///
    /// Flush and backend write errors.
    pub fn finish(self) -> Result<()> {
        match self {
            Self::Stdin(_) => Ok(()),
            Self::Stdout(mut out) => Ok(out.flush()?),
            Self::Store(handle) => handle.finish(),
        }
    }

    /// Discards a pending store write.
    pub fn abort(self) {
        if let Self::Store(handle) = self {
            handle.abort();
        }
    }
}

impl Read for SmartHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Stdin(input) => input.read(buf),
            Self::Store(handle) => handle.read(buf),
            Self::Stdout(_) => Err(io::Error::new(io::ErrorKind::Unsupported, "stdout is not readable")),
        }
    }
}

impl Write for SmartHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stdout(out) => out.write(buf),
            Self::Store(handle) => handle.write(buf),
            Self::Stdin(_) => Err(io::Error::new(io::ErrorKind::Unsupported, "stdin is not writable")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stdout(out) => out.flush(),
            Self::Store(handle) => handle.flush(),
            Self::Stdin(_) => Ok(()),
        }
    }
}

/// Opens `location` for reading or writing. `-` is stdin or stdout.
///
/// # Errors
///
/// [`StoreError::DoesNotExist`] when reading a missing location; resolver
/// errors for unsupported URIs.
pub fn smart_open(location: &str, mode: OpenMode) -> Result<SmartHandle> {
    if location == STDIO {
        return Ok(match mode {
            OpenMode::Read => SmartHandle::Stdin(io::stdin().lock()),
            OpenMode::Write => SmartHandle::Stdout(io::stdout().lock()),
        });
    }
    let (uri, key) = split_location(location);
    Ok(SmartHandle::Store(Store::from_uri(&uri)?.open(&key, mode)?))
}

/// Whole content of `location`.
///
/// # Errors
///
/// See [`smart_open`].
pub fn smart_read(location: &str) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    smart_open(location, OpenMode::Read)?.read_to_end(&mut data)?;
    Ok(data)
}

/// Replaces the content of `location` with `data`.
///
/// # Errors
///
/// See [`smart_open`].
pub fn smart_write(location: &str, data: &[u8]) -> Result<()> {
    let mut handle = smart_open(location, OpenMode::Write)?;
    match handle.write_all(data) {
        Ok(()) => handle.finish(),
        Err(e) => {
            handle.abort();
            Err(e.into())
        }
    }
}

/// Copies `input` to `output` and returns the number of bytes copied.
///
/// # Errors
///
/// See [`smart_open`]. A failed copy leaves `output` untouched.
pub fn smart_copy(input: &str, output: &str) -> Result<u64> {
    let mut reader = smart_open(input, OpenMode::Read)?;
    let mut writer = smart_open(output, OpenMode::Write)?;
    match io::copy(&mut reader, &mut writer) {
        Ok(copied) => {
            writer.finish()?;
            Ok(copied)
        }
        Err(e) => {
            writer.abort();
            Err(e.into())
        }
    }
}

/// Lazily yields the lines of `location`, without line terminators.
///
/// # Errors
///
/// See [`smart_open`]; read errors are yielded by the iterator.
pub fn smart_stream(location: &str) -> Result<impl Iterator<Item = Result<Vec<u8>>>> {
    let lines = BufReader::new(smart_open(location, OpenMode::Read)?).split(b'\n');
    Ok(lines.map(|line| {
        let mut line = line?;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(line)
    }))
}

/// Lazily decodes `location` as JSON lines. Blank lines are skipped.
///
/// # Errors
///
/// See [`smart_stream`]; per-line decoding errors are yielded.
pub fn smart_stream_json<T: DeserializeOwned>(location: &str) -> Result<impl Iterator<Item = Result<T>>> {
    let records = smart_stream(location)?.filter_map(|line| match line {
        Ok(line) if line.iter().all(u8::is_ascii_whitespace) => None,
        Ok(line) => Some(serde_json::from_slice(&line).map_err(|e| StoreError::serialization("json", e))),
        Err(e) => Some(Err(e)),
    });
    Ok(logged_items(records, "Read", Some(location)))
}

/// Writes `items` to `location` as JSON lines.
///
/// # Errors
///
/// Encoding errors and see [`smart_write`].
pub fn smart_write_json<T: Serialize>(location: &str, items: impl IntoIterator<Item = T>) -> Result<()> {
    let mut handle = smart_open(location, OpenMode::Write)?;
    for item in logged_items(items.into_iter(), "Write", Some(location)) {
        let line = serde_json::to_vec(&item).map_err(|e| StoreError::serialization("json", e));
        let written = line.and_then(|mut line| {
            line.push(b'\n');
            handle.write_all(&line).map_err(StoreError::from)
        });
        if let Err(e) = written {
            handle.abort();
            return Err(e);
        }
    }
    handle.finish()
}

/// Passes items through, logging progress every 10 000 items and a summary
/// at the end.
#[must_use]
pub fn logged_items<I: Iterator>(items: I, action: &str, uri: Option<&str>) -> LoggedItems<I> {
    LoggedItems {
        inner: items,
        action: action.to_string(),
        uri: uri.map(str::to_string),
        chunk_size: LOG_CHUNK,
        count: 0,
        done: false,
    }
}

/// Iterator returned by [`logged_items`].
pub struct LoggedItems<I> {
    inner: I,
    action: String,
    uri: Option<String>,
    chunk_size: usize,
    count: usize,
    done: bool,
}

impl<I> LoggedItems<I> {
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Items passed through so far.
    #[must_use]
    pub fn seen(&self) -> usize {
        self.count
    }
}

impl<I: Iterator> Iterator for LoggedItems<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            Some(item) => {
                self.count += 1;
                if self.count % self.chunk_size == 0 {
                    tracing::info!(action = %self.action, uri = ?self.uri, items = self.count, "in progress");
                }
                Some(item)
            }
            None => {
                if !self.done && self.count > 0 {
                    tracing::info!(action = %self.action, uri = ?self.uri, items = self.count, "done");
                }
                self.done = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[test]
    fn locations_split_into_store_and_key() {
        assert_eq!(
            split_location("s3://bucket/dir/file.txt"),
            ("s3://bucket/dir".to_string(), "file.txt".to_string())
        );
        assert_eq!(
            split_location("data/file.txt"),
            ("data".to_string(), "file.txt".to_string())
        );
        assert_eq!(split_location("file.txt"), (".".to_string(), "file.txt".to_string()));
        assert_eq!(split_location("/file.txt"), ("/".to_string(), "file.txt".to_string()));
    }

    #[test]
    fn read_write_and_copy_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.txt").display().to_string();
        let dst = dir.path().join("out").join("copy.txt").display().to_string();
        smart_write(&src, b"payload").unwrap();
        assert_eq!(smart_read(&src).unwrap(), b"payload");
        assert_eq!(smart_copy(&src, &dst).unwrap(), 7);
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload");

        let missing = dir.path().join("nope.txt").display().to_string();
        assert!(smart_read(&missing).unwrap_err().is_missing());
    }

    #[test]
    fn json_lines_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Row {
            id: u32,
            name: String,
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl").display().to_string();
        let rows = vec![
            Row { id: 1, name: "a".into() },
            Row { id: 2, name: "b".into() },
        ];
        smart_write_json(&path, &rows).unwrap();

        let lines: Vec<Vec<u8>> = smart_stream(&path).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(lines.len(), 2);
        let back: Vec<Row> = smart_stream_json(&path).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn logged_items_passes_everything_through() {
        let mut items = logged_items(0..25, "Count", None).chunk_size(10);
        assert_eq!(items.by_ref().sum::<i32>(), 300);
        assert_eq!(items.seen(), 25);
        assert_eq!(items.next(), None);
    }
}
