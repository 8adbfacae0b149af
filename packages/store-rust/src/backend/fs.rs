//! Local filesystem [`Backend`]: one key, one file below a root directory.
//!
//! Writes go through a temporary file in the destination directory and are
//! renamed into place, so readers never observe a half-written value.
//! Listing walks the tree lazily, one directory at a time, in name order.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anystore_core::error::{Result, StoreError};
use anystore_core::key::{KeyFilter, SEPARATOR};
use tempfile::Builder;

use super::{Backend, BackendKind, BackendStat, ByteStream, KeyStream};

/// Filesystem storage rooted at a directory.
#[derive(Debug)]
pub struct FsBackend {
    uri: String,
    root: PathBuf,
}

impl FsBackend {
    /// Opens (and creates, if needed) the directory at `root`.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn new(uri: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::backend("fs", e))?;
        tracing::debug!(root = %root.display(), "filesystem store opened");
        Ok(Self {
            uri: uri.into(),
            root,
        })
    }

    /// The directory keys are stored under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> PathBuf {
        key.split(SEPARATOR)
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    fn open(&self, key: &str) -> Result<File> {
        match File::open(self.path(key)) {
            Ok(file) => Ok(file),
            Err(e) if is_missing(&e) => Err(StoreError::does_not_exist(key)),
            Err(e) => Err(StoreError::backend("fs", e)),
        }
    }
}

/// File name prefix of in-flight writes. Listings skip such files, so a
/// concurrent or crashed write never surfaces as a key.
const STAGING_PREFIX: &str = ".anystore-tmp-";

fn is_staging(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(STAGING_PREFIX))
}

fn is_missing(err: &std::io::Error) -> bool {
    // A path segment that is a file (e.g. `a` when asking for `a/b`) reports
    // NotADirectory on unix.
    err.kind() == ErrorKind::NotFound || err.raw_os_error() == Some(20)
}

#[allow(clippy::cast_possible_truncation)]
fn to_millis(time: std::io::Result<SystemTime>) -> Option<i64> {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
}

impl Backend for FsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fs
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path(key).is_file())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        match fs::read(self.path(key)) {
            Ok(data) => Ok(data),
            Err(e) if is_missing(&e) => Err(StoreError::does_not_exist(key)),
            Err(e) if self.path(key).is_dir() => {
                tracing::trace!(key, error = %e, "key is a directory");
                Err(StoreError::does_not_exist(key))
            }
            Err(e) => Err(StoreError::backend("fs", e)),
        }
    }

    fn read_stream(&self, key: &str) -> Result<ByteStream> {
        if self.path(key).is_dir() {
            return Err(StoreError::does_not_exist(key));
        }
        Ok(Box::new(self.open(key)?))
    }

    fn write(&self, key: &str, data: &[u8], _ttl: Option<Duration>) -> Result<()> {
        let path = self.path(key);
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|e| StoreError::backend("fs", e))?;
        let mut tmp = Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(parent)
            .map_err(|e| StoreError::backend("fs", e))?;
        tmp.write_all(data)
            .and_then(|()| tmp.as_file().sync_data())
            .map_err(|e| StoreError::backend("fs", e))?;
        tmp.persist(&path)
            .map_err(|e| StoreError::backend("fs", e.error))?;
        tracing::trace!(key, size = data.len(), "fs write");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        if !path.is_file() {
            return Ok(None);
        }
        let previous = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(StoreError::backend("fs", e)),
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(Some(previous)),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(StoreError::backend("fs", e)),
        }
    }

    fn list_keys(&self, filter: &KeyFilter) -> Result<KeyStream> {
        let start = if filter.prefix().is_empty() {
            self.root.clone()
        } else {
            self.path(filter.prefix())
        };
        let walk = DirWalk {
            root: self.root.clone(),
            pending: vec![start],
            files: Vec::new().into_iter(),
            filter: filter.clone(),
        };
        Ok(Box::new(walk))
    }

    fn stat(&self, key: &str) -> Result<Option<BackendStat>> {
        match fs::metadata(self.path(key)) {
            Ok(meta) if meta.is_file() => Ok(Some(BackendStat {
                size: meta.len(),
                created_at: to_millis(meta.created()),
                updated_at: to_millis(meta.modified()),
            })),
            Ok(_) => Ok(None),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(StoreError::backend("fs", e)),
        }
    }
}

/// Depth-first directory walk yielding keys relative to `root`.
struct DirWalk {
    root: PathBuf,
    pending: Vec<PathBuf>,
    files: std::vec::IntoIter<PathBuf>,
    filter: KeyFilter,
}

impl DirWalk {
    fn key_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> = relative.iter().map(|s| s.to_str()).collect();
        Some(segments?.join("/"))
    }

    /// Expands the next pending path. Files are queued, directories pushed.
    fn expand(&mut self, path: &Path) -> Result<()> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if is_missing(&e) => return Ok(()),
            Err(e) => return Err(StoreError::backend("fs", e)),
        };
        if meta.is_file() {
            self.files = vec![path.to_path_buf()].into_iter();
            return Ok(());
        }
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        let entries = fs::read_dir(path).map_err(|e| StoreError::backend("fs", e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::backend("fs", e))?;
            let file_type = entry.file_type().map_err(|e| StoreError::backend("fs", e))?;
            if file_type.is_dir() {
                dirs.push(entry.path());
            } else if file_type.is_file() && !is_staging(&entry.path()) {
                files.push(entry.path());
            }
        }
        files.sort();
        dirs.sort();
        // Reverse so that popping visits directories in name order.
        self.pending.extend(dirs.into_iter().rev());
        self.files = files.into_iter();
        Ok(())
    }
}

impl Iterator for DirWalk {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            while let Some(path) = self.files.next() {
                if let Some(key) = self.key_of(&path) {
                    if self.filter.matches(&key) {
                        return Some(Ok(key));
                    }
                }
            }
            let dir = self.pending.pop()?;
            if let Err(err) = self.expand(&dir) {
                self.pending.clear();
                return Some(Err(err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn backend() -> (tempfile::TempDir, FsBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new("file:///tmp", dir.path()).unwrap();
        (dir, backend)
    }

    fn keys(backend: &FsBackend, filter: &KeyFilter) -> Vec<String> {
        backend.list_keys(filter).unwrap().collect::<Result<_>>().unwrap()
    }

    #[test]
    fn write_creates_nested_directories() {
        let (dir, backend) = backend();
        backend.write("a/b/c.txt", b"hello", None).unwrap();
        assert_eq!(fs::read(dir.path().join("a/b/c.txt")).unwrap(), b"hello");
        assert_eq!(backend.read("a/b/c.txt").unwrap(), b"hello");
    }

    #[test]
    fn missing_and_directory_keys_do_not_exist() {
        let (_dir, backend) = backend();
        backend.write("a/b", b"x", None).unwrap();
        assert!(backend.read("nope").unwrap_err().is_missing());
        assert!(backend.read("a").unwrap_err().is_missing());
        assert!(backend.read("a/b/c").unwrap_err().is_missing());
        assert!(!backend.exists("a").unwrap());
        assert_eq!(backend.stat("a").unwrap(), None);
    }

    #[test]
    fn stream_reads_incrementally() {
        let (_dir, backend) = backend();
        backend.write("big", &vec![1u8; 100_000], None).unwrap();
        let mut stream = backend.read_stream("big").unwrap();
        let mut head = [0u8; 10];
        stream.read_exact(&mut head).unwrap();
        assert_eq!(head, [1u8; 10]);
    }

    #[test]
    fn delete_returns_previous_and_is_idempotent() {
        let (_dir, backend) = backend();
        backend.write("k", b"v", None).unwrap();
        assert_eq!(backend.delete("k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(backend.delete("k").unwrap(), None);
    }

    #[test]
    fn listing_is_recursive_and_ordered() {
        let (_dir, backend) = backend();
        for key in ["topic/b", "topic/a", "topic/sub/c", "other/c", "root"] {
            backend.write(key, b"", None).unwrap();
        }
        assert_eq!(
            keys(&backend, &KeyFilter::new()),
            vec!["root", "other/c", "topic/a", "topic/b", "topic/sub/c"]
        );
        let topic = KeyFilter::new().with_prefix("topic").unwrap();
        assert_eq!(keys(&backend, &topic), vec!["topic/a", "topic/b", "topic/sub/c"]);
        let glob = KeyFilter::from_parts(Some("topic"), Some("topic/sub"), Some("*")).unwrap();
        assert_eq!(keys(&backend, &glob), vec!["topic/a", "topic/b"]);
        let missing = KeyFilter::new().with_prefix("nothing").unwrap();
        assert!(keys(&backend, &missing).is_empty());
    }

    #[test]
    fn leftover_staging_files_are_not_listed() {
        let (dir, backend) = backend();
        backend.write("topic/a", b"1", None).unwrap();
        fs::write(dir.path().join(".anystore-tmp-x1y2z3"), b"half").unwrap();
        fs::write(dir.path().join("topic").join(".anystore-tmp-abc"), b"half").unwrap();
        assert_eq!(keys(&backend, &KeyFilter::new()), vec!["topic/a"]);
    }

    #[test]
    fn stat_reports_size_and_mtime() {
        let (_dir, backend) = backend();
        backend.write("k", b"12345", None).unwrap();
        let stat = backend.stat("k").unwrap().unwrap();
        assert_eq!(stat.size, 5);
        assert!(stat.updated_at.is_some());
    }
}
