//! Scratch space for processing remote content locally.
//!
//! A [`VirtualStore`] is a raw filesystem store in a fresh temporary
//! directory. Content is downloaded into it under a random key that keeps the
//! source's extension; the directory and everything in it is removed when the
//! store is dropped.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anystore_core::error::{Result, StoreError};
use anystore_core::serialize::Mode;
use tempfile::TempDir;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::io::{smart_open, SmartHandle};
use crate::store::{OpenMode, Store, StoreHandle};

const DEFAULT_PREFIX: &str = "anystore-";
const FALLBACK_EXTENSION: &str = "lfc";

/// Temporary local store, deleted on drop.
pub struct VirtualStore {
    store: Store,
    // Dropped after `store`.
    dir: TempDir,
}

impl VirtualStore {
    /// Creates an empty store in a new temporary directory whose name starts
    /// with `prefix` (default `anystore-`).
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn new(prefix: Option<&str>) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(prefix.unwrap_or(DEFAULT_PREFIX))
            .tempdir()
            .map_err(|e| StoreError::backend("fs", e))?;
        let config = StoreConfig {
            serialization_mode: Mode::Raw,
            ..StoreConfig::with_uri(dir.path().display().to_string())
        };
        let store = Store::new(config)?;
        tracing::debug!(path = %dir.path().display(), "virtual store created");
        Ok(Self { store, dir })
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Local file path of `key`.
    #[must_use]
    pub fn local_path(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.dir.path().to_path_buf(), |path, segment| path.join(segment))
    }

    /// Copies the content at `location` (a path, URI or `-`) into the store
    /// and returns its new key.
    ///
    /// # Errors
    ///
    /// [`StoreError::DoesNotExist`] for a missing source; read and write
    /// errors otherwise.
    pub fn download(&self, location: &str) -> Result<String> {
        let source = smart_open(location, OpenMode::Read)?;
        self.ingest(location, source)
    }

    /// Copies `key` of `source` into the store and returns its new key.
    ///
    /// # Errors
    ///
    /// See [`VirtualStore::download`].
    pub fn download_from(&self, source: &Store, key: &str) -> Result<String> {
        let handle = source.open(key, OpenMode::Read)?;
        self.ingest(key, SmartHandle::Store(handle))
    }

    fn ingest(&self, name: &str, mut source: impl Read) -> Result<String> {
        let key = format!("{}.{}", Uuid::new_v4(), extension_of(name));
        let mut target = self.store.open(&key, OpenMode::Write)?;
        match io::copy(&mut source, &mut target) {
            Ok(size) => {
                target.finish()?;
                tracing::debug!(source = name, key = %key, size, "downloaded into virtual store");
                Ok(key)
            }
            Err(e) => {
                target.abort();
                Err(e.into())
            }
        }
    }

    /// Opens a downloaded key for reading.
    ///
    /// # Errors
    ///
    /// [`StoreError::DoesNotExist`] for unknown keys.
    pub fn open(&self, key: &str) -> Result<StoreHandle> {
        self.store.open(key, OpenMode::Read)
    }

    /// Removes one downloaded key before the whole store is dropped.
    ///
    /// # Errors
    ///
    /// Backend errors.
    pub fn cleanup(&self, key: &str) -> Result<()> {
        self.store.delete(key)
    }
}

fn extension_of(name: &str) -> &str {
    let last = name.rsplit('/').next().unwrap_or(name);
    Path::new(last)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .unwrap_or(FALLBACK_EXTENSION)
}

/// Downloads `location` into a fresh [`VirtualStore`] and opens it.
///
/// The returned handle keeps the store alive; dropping it removes the copy.
///
/// # Errors
///
/// See [`VirtualStore::download`].
pub fn open_virtual(location: &str, prefix: Option<&str>) -> Result<VirtualFile> {
    let store = VirtualStore::new(prefix)?;
    let key = store.download(location)?;
    let handle = store.open(&key)?;
    Ok(VirtualFile { handle, key, store })
}

/// Local copy of remote content, see [`open_virtual`].
pub struct VirtualFile {
    handle: StoreHandle,
    key: String,
    store: VirtualStore,
}

impl VirtualFile {
    /// Local file path of the copy, valid while `self` lives.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.store.local_path(&self.key)
    }
}

impl Read for VirtualFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.handle.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downloads_keep_extension_and_vanish_on_drop() {
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("report.csv");
        std::fs::write(&source, b"a,b\n1,2\n").unwrap();

        let virtual_store = VirtualStore::new(Some("anystore-test-")).unwrap();
        let root = virtual_store.path().to_path_buf();
        let key = virtual_store.download(&source.display().to_string()).unwrap();
        assert!(key.ends_with(".csv"));
        assert_eq!(std::fs::read(virtual_store.local_path(&key)).unwrap(), b"a,b\n1,2\n");

        let mut body = String::new();
        virtual_store.open(&key).unwrap().read_to_string(&mut body).unwrap();
        assert_eq!(body, "a,b\n1,2\n");

        virtual_store.cleanup(&key).unwrap();
        assert!(!virtual_store.local_path(&key).exists());
        drop(virtual_store);
        assert!(!root.exists());
    }

    #[test]
    fn download_from_store_without_extension() {
        let source = Store::from_uri("memory://").unwrap();
        source.put("blob", b"raw".to_vec()).unwrap();
        let virtual_store = VirtualStore::new(None).unwrap();
        let key = virtual_store.download_from(&source, "blob").unwrap();
        assert!(key.ends_with(".lfc"));
        assert!(virtual_store.download_from(&source, "missing").unwrap_err().is_missing());
    }

    #[test]
    fn open_virtual_reads_local_copy() {
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("data.json");
        std::fs::write(&source, b"{\"x\": 1}").unwrap();

        let mut file = open_virtual(&source.display().to_string(), None).unwrap();
        let path = file.path();
        assert!(path.exists());
        let mut body = String::new();
        file.read_to_string(&mut body).unwrap();
        assert_eq!(body, "{\"x\": 1}");
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn extensions_are_taken_from_the_last_segment() {
        assert_eq!(extension_of("s3://bucket/dir.v2/file.tar.gz"), "gz");
        assert_eq!(extension_of("dir.v2/file"), "lfc");
        assert_eq!(extension_of("https://example.org/"), "lfc");
    }
}
