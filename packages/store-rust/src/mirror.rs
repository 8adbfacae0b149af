//! Byte-level copy of keys from one store to another.

use std::io;

use anystore_core::error::{Result, StoreError};
use anystore_core::key::KeyFilter;

use crate::store::{OpenMode, Store};
use crate::worker::Worker;

/// What to copy.
#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    /// Keys to copy (prefix, excluded prefix, glob).
    pub filter: KeyFilter,
    /// Replace keys that already exist in the target.
    pub overwrite: bool,
    /// Copy threads; `0` uses one per available CPU.
    pub workers: usize,
}

/// Outcome of [`mirror`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MirrorReport {
    pub mirrored: u64,
    pub skipped: u64,
}

impl MirrorReport {
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            mirrored: self.mirrored + other.mirrored,
            skipped: self.skipped + other.skipped,
        }
    }
}

/// Copies raw bytes of `key` from `source` to `target`.
///
/// # Errors
///
/// Read errors on `source`, write errors on `target`.
pub fn copy_key(source: &Store, target: &Store, key: &str) -> Result<u64> {
    let mut reader = source.open(key, OpenMode::Read)?;
    let mut writer = target.open(key, OpenMode::Write)?;
    match io::copy(&mut reader, &mut writer) {
        Ok(copied) => {
            writer.finish()?;
            Ok(copied)
        }
        Err(e) => {
            writer.abort();
            Err(StoreError::backend(source.kind().as_str(), e))
        }
    }
}

fn mirror_key(source: &Store, target: &Store, overwrite: bool, report: &mut MirrorReport, key: &str) -> Result<()> {
    if !overwrite && target.exists(key)? {
        tracing::info!(key, target = %target.uri(), "skipping existing key");
        report.skipped += 1;
        return Ok(());
    }
    match copy_key(source, target, key) {
        Ok(size) => {
            tracing::info!(key, size, source = %source.uri(), target = %target.uri(), "mirrored");
            report.mirrored += 1;
            Ok(())
        }
        // Listed but gone: deleted meanwhile, or an emulated expiry has passed.
        Err(e) if e.is_missing() => {
            tracing::info!(key, source = %source.uri(), "skipping vanished key");
            report.skipped += 1;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Copies every key of `source` passing `options.filter` into `target`.
///
/// Keys keep their names; each store applies its own key prefix. Existing
/// target keys are skipped unless `options.overwrite` is set, as are listed
/// keys that can no longer be read from the source. Copies run on
/// `options.workers` threads.
///
/// # Errors
///
/// Stops at the first listing, read or write error.
pub fn mirror(source: &Store, target: &Store, options: &MirrorOptions) -> Result<MirrorReport> {
    let worker = Worker::new(options.workers);
    tracing::info!(
        source = %source.uri(),
        target = %target.uri(),
        threads = worker.threads(),
        "mirror started"
    );
    let report = worker
        .run(source.iterate_keys(&options.filter)?, |report: &mut MirrorReport, key: String| {
            mirror_key(source, target, options.overwrite, report, &key)
        })?
        .into_iter()
        .fold(MirrorReport::default(), MirrorReport::merge);
    tracing::info!(
        mirrored = report.mirrored,
        skipped = report.skipped,
        source = %source.uri(),
        target = %target.uri(),
        "mirror finished"
    );
    Ok(report)
}
