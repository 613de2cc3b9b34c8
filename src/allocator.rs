//! Unique job id allocation.
//!
//! Generates monotonically increasing, gap-tolerant sequence numbers per
//! (directory, basename) pair. The "next id" lives in a
//! `<basename>-nextnr` counter file guarded by a per-directory lock that
//! is distinct from the per-job locks. Uniqueness, not density, is the
//! guarantee: ids allocated but never consumed are simply skipped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::warn;

use crate::error::{Result, SpoolError};
use crate::lock::{self, LockMode};

/// Allocate a fresh job id in `directory` and the payload path that goes
/// with it.
///
/// The returned filename has the form `basename-NNN.suffix` with `NNN`
/// zero-padded to at least three digits, growing naturally beyond 999.
///
/// The counter lock is taken blocking: the critical section is only
/// read-counter, maybe-scan, write-counter, so queuing behind it is
/// bounded. A concurrent caller queued behind the same lock never
/// observes a repeated id because the incremented counter is persisted
/// before the lock is released.
pub fn allocate(directory: &Path, basename: &str, suffix: &str) -> Result<(u32, PathBuf)> {
    let guard = lock::acquire(&counter_lock_path(directory), LockMode::Blocking)?;
    let allocated = next_id(directory, basename, suffix);
    guard.release()?;
    let id = allocated?;

    let name = format!("{basename}-{id:03}.{suffix}");
    Ok((id, directory.join(name)))
}

/// Path of the counter file for `basename` in `directory`.
pub fn counter_path(directory: &Path, basename: &str) -> PathBuf {
    directory.join(format!("{basename}-nextnr"))
}

fn counter_lock_path(directory: &Path) -> PathBuf {
    directory.join("nextnr.lock")
}

fn next_id(directory: &Path, basename: &str, suffix: &str) -> Result<u32> {
    let counter = counter_path(directory, basename);
    let id = match read_counter(&counter)? {
        Some(next) => next,
        // Counter missing or unreadable: recover by scanning the
        // directory for the highest allocated number. O(directory size),
        // but only on this rare path.
        None => scan_for_next(directory, basename, suffix)?,
    };
    write_counter(&counter, id + 1)?;
    Ok(id)
}

fn read_counter(path: &Path) -> Result<Option<u32>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(SpoolError::io(
                format!("reading counter file {}", path.display()),
                err,
            ));
        }
    };
    match content.lines().next().map(str::trim).map(str::parse::<u32>) {
        Some(Ok(count)) => Ok(Some(count)),
        _ => {
            warn!(counter = %path.display(), "counter file unreadable, rescanning directory");
            Ok(None)
        }
    }
}

fn write_counter(path: &Path, count: u32) -> Result<()> {
    fs::write(path, format!("{count}\n")).map_err(|e| {
        SpoolError::io(format!("writing counter file {}", path.display()), e)
    })
}

fn scan_for_next(directory: &Path, basename: &str, suffix: &str) -> Result<u32> {
    let pattern = counted_file_pattern(basename, suffix)?;
    let entries = fs::read_dir(directory).map_err(|e| {
        SpoolError::io(format!("listing directory {}", directory.display()), e)
    })?;

    let mut highest = 0_u32;
    for entry in entries {
        let entry = entry.map_err(|e| {
            SpoolError::io(format!("listing directory {}", directory.display()), e)
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(captures) = pattern.captures(name) {
            if let Ok(number) = captures[1].parse::<u32>() {
                highest = highest.max(number);
            }
        }
    }
    Ok(highest + 1)
}

fn counted_file_pattern(basename: &str, suffix: &str) -> Result<Regex> {
    let pattern = format!(
        "^{}-([0-9]+)\\.{}$",
        regex::escape(basename),
        regex::escape(suffix)
    );
    Regex::new(&pattern)
        .map_err(|e| SpoolError::Configuration(format!("bad filename pattern: {e}")))
}
