//! Zip archive [`Backend`]: keys are member paths inside one container file.
//!
//! Reads open the archive fresh each time, so other processes' changes are
//! visible. New keys are appended in place; overwriting or deleting a key
//! rewrites the archive into a temporary file (copying untouched members
//! without recompressing) and renames it over the original.

use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anystore_core::error::{Result, StoreError};
use anystore_core::key::KeyFilter;
use flate2::read::DeflateDecoder;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{Backend, BackendKind, BackendStat, ByteStream, KeyStream};

fn zip_err(e: ZipError) -> StoreError {
    StoreError::backend("archive", e)
}

/// Zip container storage.
pub struct ArchiveBackend {
    uri: String,
    path: PathBuf,
    // Serializes writers within this process.
    write_lock: Mutex<()>,
}

impl ArchiveBackend {
    /// Uses the archive at `path`; it is created on first write.
    pub fn new(uri: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            uri: uri.into(),
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the container file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the archive for reading, `None` if the file does not exist yet.
    fn archive(&self) -> Result<Option<ZipArchive<File>>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::backend("archive", e)),
        };
        ZipArchive::new(file).map(Some).map_err(zip_err)
    }

    fn options() -> SimpleFileOptions {
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
    }

    /// Rewrites the archive without `skip`, optionally adding `(key, data)`.
    fn rewrite(&self, archive: &mut ZipArchive<File>, skip: &str, add: Option<&[u8]>) -> Result<()> {
        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        let tmp = NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))
            .map_err(|e| StoreError::backend("archive", e))?;
        let mut writer = ZipWriter::new(tmp);
        for i in 0..archive.len() {
            let member = archive.by_index_raw(i).map_err(zip_err)?;
            if member.name() == skip {
                continue;
            }
            writer.raw_copy_file(member).map_err(zip_err)?;
        }
        if let Some(data) = add {
            writer.start_file(skip, Self::options()).map_err(zip_err)?;
            writer
                .write_all(data)
                .map_err(|e| StoreError::backend("archive", e))?;
        }
        let tmp = writer.finish().map_err(zip_err)?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::backend("archive", e.error))?;
        Ok(())
    }

    fn append(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut writer = if self.path.exists() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&self.path)
                .map_err(|e| StoreError::backend("archive", e))?;
            ZipWriter::new_append(file).map_err(zip_err)?
        } else {
            if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir).map_err(|e| StoreError::backend("archive", e))?;
            }
            let file = File::create(&self.path).map_err(|e| StoreError::backend("archive", e))?;
            ZipWriter::new(file)
        };
        writer.start_file(key, Self::options()).map_err(zip_err)?;
        writer
            .write_all(data)
            .map_err(|e| StoreError::backend("archive", e))?;
        writer.finish().map_err(zip_err)?;
        Ok(())
    }
}

impl Backend for ArchiveBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Archive
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .archive()?
            .is_some_and(|archive| archive.index_for_name(key).is_some()))
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let Some(mut archive) = self.archive()? else {
            return Err(StoreError::does_not_exist(key));
        };
        let mut member = match archive.by_name(key) {
            Ok(member) => member,
            Err(ZipError::FileNotFound) => return Err(StoreError::does_not_exist(key)),
            Err(e) => return Err(zip_err(e)),
        };
        let mut data = Vec::with_capacity(usize::try_from(member.size()).unwrap_or_default());
        member
            .read_to_end(&mut data)
            .map_err(|e| StoreError::backend("archive", e))?;
        Ok(data)
    }

    fn read_stream(&self, key: &str) -> Result<ByteStream> {
        let Some(mut archive) = self.archive()? else {
            return Err(StoreError::does_not_exist(key));
        };
        let (method, start, length) = match archive.by_name(key) {
            Ok(member) => (member.compression(), member.data_start(), member.compressed_size()),
            Err(ZipError::FileNotFound) => return Err(StoreError::does_not_exist(key)),
            Err(e) => return Err(zip_err(e)),
        };
        drop(archive);
        // Stored and deflated members are read straight from the container
        // file; anything else is decompressed up front.
        let raw = || -> Result<std::io::Take<File>> {
            let mut file = File::open(&self.path).map_err(|e| StoreError::backend("archive", e))?;
            file.seek(SeekFrom::Start(start))
                .map_err(|e| StoreError::backend("archive", e))?;
            Ok(file.take(length))
        };
        match method {
            CompressionMethod::Stored => Ok(Box::new(raw()?)),
            CompressionMethod::Deflated => Ok(Box::new(DeflateDecoder::new(raw()?))),
            _ => Ok(Box::new(Cursor::new(self.read(key)?))),
        }
    }

    fn write(&self, key: &str, data: &[u8], _ttl: Option<Duration>) -> Result<()> {
        let _guard = self.write_lock.lock();
        match self.archive()? {
            Some(mut archive) if archive.index_for_name(key).is_some() => {
                self.rewrite(&mut archive, key, Some(data))?;
            }
            Some(archive) => {
                drop(archive);
                self.append(key, data)?;
            }
            None => self.append(key, data)?,
        }
        tracing::trace!(key, size = data.len(), path = %self.path.display(), "archive write");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.write_lock.lock();
        let Some(mut archive) = self.archive()? else {
            return Ok(None);
        };
        if archive.index_for_name(key).is_none() {
            return Ok(None);
        }
        let previous = self.read(key)?;
        self.rewrite(&mut archive, key, None)?;
        Ok(Some(previous))
    }

    fn list_keys(&self, filter: &KeyFilter) -> Result<KeyStream> {
        let Some(archive) = self.archive()? else {
            return Ok(Box::new(std::iter::empty()));
        };
        let keys: Vec<String> = archive
            .file_names()
            .filter(|name| !name.ends_with('/') && filter.matches(name))
            .map(str::to_string)
            .collect();
        Ok(Box::new(keys.into_iter().map(Ok)))
    }

    fn stat(&self, key: &str) -> Result<Option<BackendStat>> {
        let Some(mut archive) = self.archive()? else {
            return Ok(None);
        };
        let size = match archive.by_name(key) {
            Ok(member) => member.size(),
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(zip_err(e)),
        };
        Ok(Some(BackendStat {
            size,
            created_at: None,
            updated_at: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, ArchiveBackend) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.zip");
        let backend = ArchiveBackend::new(format!("zip://{}", path.display()), path);
        (dir, backend)
    }

    fn keys(backend: &ArchiveBackend) -> Vec<String> {
        backend
            .list_keys(&KeyFilter::new())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn empty_archive_has_no_keys() {
        let (_dir, backend) = backend();
        assert!(!backend.exists("a").unwrap());
        assert!(backend.read("a").unwrap_err().is_missing());
        assert!(keys(&backend).is_empty());
        assert_eq!(backend.delete("a").unwrap(), None);
    }

    #[test]
    fn append_overwrite_delete() {
        let (_dir, backend) = backend();
        backend.write("a/1.txt", b"one", None).unwrap();
        backend.write("a/2.txt", b"two", None).unwrap();
        backend.write("a/1.txt", b"uno", None).unwrap();
        assert_eq!(backend.read("a/1.txt").unwrap(), b"uno");
        assert_eq!(backend.read("a/2.txt").unwrap(), b"two");
        let mut listed = keys(&backend);
        listed.sort();
        assert_eq!(listed, vec!["a/1.txt", "a/2.txt"]);

        assert_eq!(backend.delete("a/2.txt").unwrap(), Some(b"two".to_vec()));
        assert_eq!(keys(&backend), vec!["a/1.txt"]);
    }

    #[test]
    fn stream_decompresses_lazily() {
        let (_dir, backend) = backend();
        let data: Vec<u8> = (0..50_000u32).flat_map(u32::to_le_bytes).collect();
        backend.write("blob", &data, None).unwrap();
        let mut out = Vec::new();
        backend.read_stream("blob").unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(backend.stat("blob").unwrap().unwrap().size, data.len() as u64);
    }
}
