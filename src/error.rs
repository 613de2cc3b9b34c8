//! Error types for the spool system.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the queue, lock and record layers.
///
/// The first three variants are the recoverable contention/validity cases
/// the retry sweep handles by skipping; everything else propagates
/// unmodified to the driver, which must leave the job in its current,
/// retryable directory.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// A non-blocking lock acquisition found the resource busy.
    ///
    /// Recoverable: the caller skips the job and retries on the next sweep,
    /// never in a loop.
    #[error("lock already taken: {path}")]
    LockTaken { path: PathBuf },

    /// Abort was requested on a job currently locked by another worker.
    ///
    /// The caller must not force-delete; surfaced as "try again shortly".
    #[error("job is locked by another worker: {job}")]
    JobLocked { job: PathBuf },

    /// Operation requested on a record that is not writable or already gone.
    #[error("no such job or job not abortable: {job}")]
    InvalidJob { job: PathBuf },

    /// The record file exists but cannot be safely interpreted.
    ///
    /// Not recovered locally: required fields are never default-filled.
    #[error("malformed job record {path}: {detail}")]
    MalformedRecord { path: PathBuf, detail: String },

    /// A required field is absent from an otherwise well-formed record.
    #[error("missing required field '{field}' in {path}")]
    MissingField { field: String, path: PathBuf },

    /// The owning user does not exist in the passwd database.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Invalid or inconsistent configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Filesystem I/O error with human-readable context.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl SpoolError {
    /// Wrap an I/O error with human-readable context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SpoolError>;
