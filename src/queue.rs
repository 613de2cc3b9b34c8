//! Directory-backed job queues.
//!
//! The filesystem is the sole source of truth: a queue is a directory
//! holding job records in one state, state is discovered by listing plus
//! filename matching, and state transitions are renames. The primitives
//! here are safe when invoked from multiple independent processes polling
//! the same tree concurrently; all mutation of a given job is serialized
//! by that job's advisory lock.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::allocator;
use crate::config::SpoolConfig;
use crate::delivery::Notifier;
use crate::error::{Result, SpoolError};
use crate::lock::{self, lock_path_for, LockMode};
use crate::record::{JobRecord, TIME_FORMAT};
use crate::unix;

/// The states a job record can be in, each backed by one directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Outbound jobs awaiting delivery.
    Sendq,
    /// Jobs delivered successfully.
    Done,
    /// Jobs that exhausted their retries.
    Failed,
    /// Received faxes and voice messages awaiting inquiry.
    Received,
}

impl QueueState {
    /// Directory name below the spool or user directory.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Sendq => "sendq",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Received => "received",
        }
    }

    /// Whether jobs in this state are never attempted again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for QueueState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sendq" => Ok(Self::Sendq),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "received" => Ok(Self::Received),
            _ => Err(format!("invalid queue state: {s}")),
        }
    }
}

/// The two media kinds the spool carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// SFF fax images.
    Fax,
    /// A-law audio recordings.
    Voice,
}

impl JobKind {
    /// Filename basename (`fax-NNN.*` / `voice-NNN.*`).
    pub fn basename(&self) -> &'static str {
        match self {
            Self::Fax => "fax",
            Self::Voice => "voice",
        }
    }

    /// Payload file suffix.
    pub fn payload_suffix(&self) -> &'static str {
        match self {
            Self::Fax => "sff",
            Self::Voice => "la",
        }
    }
}

fn record_pattern(kind: JobKind) -> &'static Regex {
    static FAX: OnceLock<Regex> = OnceLock::new();
    static VOICE: OnceLock<Regex> = OnceLock::new();
    match kind {
        JobKind::Fax => {
            FAX.get_or_init(|| Regex::new(r"^fax-([0-9]+)\.txt$").expect("static pattern"))
        }
        JobKind::Voice => {
            VOICE.get_or_init(|| Regex::new(r"^voice-([0-9]+)\.txt$").expect("static pattern"))
        }
    }
}

/// One user-visible queue of jobs of a single kind.
#[derive(Debug, Clone)]
pub struct JobQueue {
    config: SpoolConfig,
    kind: JobKind,
}

impl JobQueue {
    pub fn new(config: SpoolConfig, kind: JobKind) -> Self {
        Self { config, kind }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Directory backing `state` for `user`.
    ///
    /// `sendq` and `received` are per-user; `done` and `failed` are
    /// shared below the spool root, with filenames prefixed by the
    /// owning user on the way in.
    pub fn queue_dir(&self, user: &str, state: QueueState) -> PathBuf {
        match state {
            QueueState::Sendq | QueueState::Received => self
                .user_dir(user)
                .join(state.dir_name()),
            QueueState::Done => self.config.done_dir(),
            QueueState::Failed => self.config.failed_dir(),
        }
    }

    fn user_dir(&self, user: &str) -> PathBuf {
        let base = match self.kind {
            JobKind::Fax => &self.config.fax_user_dir,
            JobKind::Voice => &self.config.voice_user_dir,
        };
        base.join(user)
    }

    /// Create the per-user queue directories when absent (0700, owned by
    /// the user when running privileged).
    pub fn ensure_user_dirs(&self, user: &str) -> Result<()> {
        unix::make_user_dir(user, &self.user_dir(user))?;
        unix::make_user_dir(user, &self.queue_dir(user, QueueState::Sendq))?;
        unix::make_user_dir(user, &self.queue_dir(user, QueueState::Received))?;
        Ok(())
    }

    /// Enqueue an outbound job.
    ///
    /// Allocates a unique payload filename, lets `converter` materialize
    /// the payload at that path, then creates and protects the record.
    /// A `dialstring` configured for the user fills in when the caller
    /// passed none. Converter failure aborts the enqueue without leaving
    /// a record behind; a partially written payload may remain and is the
    /// caller's to clean up.
    pub fn enqueue<F>(
        &self,
        user: &str,
        converter: F,
        fields: BTreeMap<String, String>,
    ) -> Result<u32>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        self.ensure_user_dirs(user)?;
        let sendq = self.queue_dir(user, QueueState::Sendq);
        let (job, payload) =
            allocator::allocate(&sendq, self.kind.basename(), self.kind.payload_suffix())?;

        converter(&payload)?;

        let mut fields = fields;
        fields
            .entry("user".to_string())
            .or_insert_with(|| user.to_string());
        if let Some(default) = self.config.user(user).and_then(|u| u.dialstring.clone()) {
            fields.entry("dialstring".to_string()).or_insert(default);
        }
        let record = JobRecord::create_for(&payload, fields)?;
        unix::set_protection(user, 0o600, &[&payload, record.path()])?;

        info!(user, job, payload = %payload.display(), "job enqueued");
        Ok(job)
    }

    /// Record a received fax or voice message.
    ///
    /// The payload has already been written (by the telephony core); this
    /// creates the description next to it with the call metadata and the
    /// disconnect cause (`0xXXXX/0xXXXX`), protects both files and tells
    /// the owning user through `notifier`, with the payload attached.
    pub fn create_received_job(
        &self,
        user: &str,
        payload: &Path,
        call_from: &str,
        call_to: &str,
        cause: (u32, u32),
        notifier: &impl Notifier,
    ) -> Result<JobRecord> {
        let mut fields = BTreeMap::new();
        fields.insert("call_from".to_string(), call_from.to_string());
        fields.insert("call_to".to_string(), call_to.to_string());
        fields.insert(
            "time".to_string(),
            Local::now().format(TIME_FORMAT).to_string(),
        );
        fields.insert(
            "cause".to_string(),
            format!("0x{:x}/0x{:x}", cause.0, cause.1),
        );

        let record = JobRecord::create_for(payload, fields)?;
        unix::set_protection(user, 0o600, &[payload, record.path()])?;
        notifier.job_received(&self.config.notify_address(user), &record, payload);

        info!(user, payload = %payload.display(), "received job recorded");
        Ok(record)
    }

    /// All pending jobs in the user's sendq, unordered.
    ///
    /// Yields (job number, record path) pairs. No readiness filtering:
    /// whether a job is due is the driver's decision.
    pub fn list(&self, user: &str) -> Result<Vec<(u32, PathBuf)>> {
        let sendq = self.queue_dir(user, QueueState::Sendq);
        let entries = fs::read_dir(&sendq)
            .map_err(|e| SpoolError::io(format!("listing queue {}", sendq.display()), e))?;

        let pattern = record_pattern(self.kind);
        let mut jobs = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| SpoolError::io(format!("listing queue {}", sendq.display()), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(captures) = pattern.captures(name) {
                if let Ok(number) = captures[1].parse::<u32>() {
                    jobs.push((number, sendq.join(name)));
                }
            }
        }
        Ok(jobs)
    }

    /// Record path for a job number in the user's sendq.
    pub fn record_path(&self, user: &str, job: u32) -> PathBuf {
        self.queue_dir(user, QueueState::Sendq)
            .join(format!("{}-{:03}.txt", self.kind.basename(), job))
    }

    /// Move a job into `target`, prefixing both filenames with the owning
    /// user's name, and rewrite the record's `filename` field.
    ///
    /// The record is renamed first (keeping its owner and protection),
    /// then the payload. The pair is not moved as a single atomic unit: a
    /// crash between the two renames leaves them split across directories.
    /// That window is a known limitation of the format, not masked here.
    pub fn move_to(
        &self,
        record_path: &Path,
        target: QueueState,
        user: &str,
    ) -> Result<JobRecord> {
        let mut record = JobRecord::read(record_path)?;
        let payload = record.payload()?;
        let target_dir = self.queue_dir(user, target);

        let new_record_path = target_dir.join(prefixed(user, record_path)?);
        let new_payload = target_dir.join(prefixed(user, &payload)?);

        fs::rename(record_path, &new_record_path).map_err(|e| {
            SpoolError::io(
                format!(
                    "moving record {} to {}",
                    record_path.display(),
                    new_record_path.display()
                ),
                e,
            )
        })?;
        fs::rename(&payload, &new_payload).map_err(|e| {
            SpoolError::io(
                format!(
                    "moving payload {} to {}",
                    payload.display(),
                    new_payload.display()
                ),
                e,
            )
        })?;

        record.set_path(new_record_path);
        record.set("filename", new_payload.display().to_string());
        record.write()?;

        debug!(user, target = %target, record = %record.path().display(), "job moved");
        Ok(record)
    }

    /// Abort a job: delete its payload and record.
    ///
    /// Fails with [`SpoolError::InvalidJob`] when the record is not
    /// currently writable (already gone or not ours to abort) and with
    /// [`SpoolError::JobLocked`] when another worker holds the job's lock
    /// right now; never force-deletes under a concurrent sender.
    pub fn abort(&self, record_path: &Path) -> Result<()> {
        // access(W_OK): the process must actually be able to delete the
        // pair, not merely see writable mode bits on it.
        if !unix::is_writable(record_path) {
            return Err(SpoolError::InvalidJob {
                job: record_path.to_path_buf(),
            });
        }

        let guard = match lock::acquire(&lock_path_for(record_path), LockMode::NonBlocking) {
            Ok(guard) => guard,
            Err(SpoolError::LockTaken { .. }) => {
                return Err(SpoolError::JobLocked {
                    job: record_path.to_path_buf(),
                });
            }
            Err(err) => return Err(err),
        };

        let outcome = delete_pair(record_path);
        let released = guard.release();
        outcome?;
        released?;

        info!(record = %record_path.display(), "job aborted");
        Ok(())
    }

    /// Abort a job in the user's sendq by its number.
    pub fn abort_user_job(&self, user: &str, job: u32) -> Result<()> {
        self.abort(&self.record_path(user, job))
    }
}

fn delete_pair(record_path: &Path) -> Result<()> {
    let record = JobRecord::read(record_path)?;
    let payload = record.payload()?;
    remove(&payload)?;
    remove(record_path)
}

fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SpoolError::io(format!("deleting {}", path.display()), err)),
    }
}

fn prefixed(user: &str, path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SpoolError::InvalidJob {
            job: path.to_path_buf(),
        })?;
    Ok(format!("{user}-{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_state_round_trips_through_strings() {
        for state in [
            QueueState::Sendq,
            QueueState::Done,
            QueueState::Failed,
            QueueState::Received,
        ] {
            assert_eq!(state.to_string().parse::<QueueState>(), Ok(state));
        }
        assert!("bogus".parse::<QueueState>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(QueueState::Done.is_terminal());
        assert!(QueueState::Failed.is_terminal());
        assert!(!QueueState::Sendq.is_terminal());
        assert!(!QueueState::Received.is_terminal());
    }

    #[test]
    fn kind_naming() {
        assert_eq!(JobKind::Fax.basename(), "fax");
        assert_eq!(JobKind::Fax.payload_suffix(), "sff");
        assert_eq!(JobKind::Voice.basename(), "voice");
        assert_eq!(JobKind::Voice.payload_suffix(), "la");
    }

    #[test]
    fn record_pattern_matches_records_only() {
        let pattern = record_pattern(JobKind::Fax);
        assert!(pattern.is_match("fax-001.txt"));
        assert!(pattern.is_match("fax-1234.txt"));
        assert!(!pattern.is_match("fax-001.sff"));
        assert!(!pattern.is_match("voice-001.txt"));
        assert!(!pattern.is_match("fax-001.txt.bak"));
        assert!(!pattern.is_match("alice-fax-001.txt"));
    }
}
