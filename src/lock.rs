//! Advisory file locks.
//!
//! Process-wide exclusive locks keyed by a filesystem path, held via
//! `flock(LOCK_EX)` on an open descriptor. The OS advisory lock is the
//! source of truth, not the lock file's existence; a lingering lock file
//! is harmless.
//!
//! Per-job locks are always taken non-blocking so a slow or stuck sender
//! never stalls the retry sweep for other jobs. The only blocking user is
//! the shared id-counter lock in [`crate::allocator`].

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::{Result, SpoolError};

/// Whether an acquisition should suspend until the lock is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Suspend until the lock becomes available.
    Blocking,
    /// Fail immediately with [`SpoolError::LockTaken`] when held elsewhere.
    NonBlocking,
}

/// Derive the lock file path for a record or payload path.
///
/// The extension is replaced by `.lock`, so `fax-003.txt` and
/// `fax-003.sff` map to the same `fax-003.lock`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

/// Handle for a held lock.
///
/// Dropping the guard releases the lock and deletes the lock file
/// best-effort, so the lock is released on every exit path including
/// panics. Prefer [`LockGuard::release`] where the deletion error matters.
#[derive(Debug)]
pub struct LockGuard {
    file: Option<File>,
    path: PathBuf,
}

/// Acquire the exclusive lock backing `path`.
///
/// A non-blocking acquire on an already-held lock fails with
/// [`SpoolError::LockTaken`]; the caller must treat this as "another
/// worker owns this job right now" and skip it.
pub fn acquire(path: &Path, mode: LockMode) -> Result<LockGuard> {
    let flags = match mode {
        LockMode::Blocking => libc::LOCK_EX,
        LockMode::NonBlocking => libc::LOCK_EX | libc::LOCK_NB,
    };

    loop {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| SpoolError::io(format!("opening lock file {}", path.display()), e))?;

        loop {
            match flock(&file, flags) {
                Ok(()) => break,
                Err(err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.raw_os_error() == Some(libc::EACCES) =>
                {
                    return Err(SpoolError::LockTaken {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) => {
                    return Err(SpoolError::io(
                        format!("locking {}", path.display()),
                        err,
                    ));
                }
            }
        }

        // The previous holder deletes the lock file on release, so the
        // inode we just locked may already be unlinked and a later
        // acquirer may hold the lock on a fresh file at the same path.
        // Re-open until the locked inode is the one the path names.
        if same_inode(&file, path) {
            trace!(lock = %path.display(), "lock taken");
            return Ok(LockGuard {
                file: Some(file),
                path: path.to_path_buf(),
            });
        }
    }
}

fn same_inode(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(named)) => held.ino() == named.ino() && held.dev() == named.dev(),
        _ => false,
    }
}

impl LockGuard {
    /// Path of the backing lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlock and delete the backing lock file.
    ///
    /// A `NotFound` during deletion is swallowed: once we no longer hold
    /// the lock, a later acquirer may delete the file before we do. Any
    /// other deletion error propagates.
    pub fn release(mut self) -> Result<()> {
        let file = self.file.take();
        if let Some(file) = file {
            flock(&file, libc::LOCK_UN)
                .map_err(|e| SpoolError::io(format!("unlocking {}", self.path.display()), e))?;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(SpoolError::io(
                    format!("removing lock file {}", self.path.display()),
                    err,
                ));
            }
        }
        trace!(lock = %self.path.display(), "lock released");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = flock(&file, libc::LOCK_UN);
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn flock(file: &File, flags: i32) -> io::Result<()> {
    // SAFETY: flock is a plain syscall on a descriptor we own for the
    // lifetime of `file`.
    let rc = unsafe { libc::flock(file.as_raw_fd(), flags) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
