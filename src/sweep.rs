//! The retry sweep.
//!
//! Periodically walks a user's sendq, attempts delivery of every due job
//! and applies the retry policy to the rest. Designed to run concurrently
//! with other sweeps and with interactive abort: every job is processed
//! under its non-blocking lock, so a held job is skipped rather than
//! waited for, and a stuck sender never stalls the sweep for other jobs.

use std::path::Path;

use chrono::{Duration, Local};
use tracing::{debug, error, info, warn};

use crate::config::SpoolConfig;
use crate::delivery::{DeliverFax, DeliveryRequest, Notifier};
use crate::error::{Result, SpoolError};
use crate::lock::{self, lock_path_for, LockMode};
use crate::queue::{JobQueue, QueueState};
use crate::record::JobRecord;
use crate::retry::RetryPolicy;

/// What the sweep did with the jobs it saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Jobs skipped: locked elsewhere, vanished, or not yet due.
    pub skipped: usize,
    /// Jobs delivered and moved to `done`.
    pub sent: usize,
    /// Jobs rescheduled for a later attempt.
    pub rescheduled: usize,
    /// Jobs that exhausted their retries and moved to `failed`.
    pub failed: usize,
    /// Jobs left in place because an error prevented processing.
    pub errored: usize,
}

impl SweepStats {
    fn absorb(&mut self, other: SweepStats) {
        self.skipped += other.skipped;
        self.sent += other.sent;
        self.rescheduled += other.rescheduled;
        self.failed += other.failed;
        self.errored += other.errored;
    }
}

/// Drives delivery attempts for pending jobs.
pub struct SweepRunner<D, N> {
    queue: JobQueue,
    policy: RetryPolicy,
    config: SpoolConfig,
    delivery: D,
    notifier: N,
}

impl<D: DeliverFax, N: Notifier> SweepRunner<D, N> {
    pub fn new(queue: JobQueue, config: SpoolConfig, delivery: D, notifier: N) -> Self {
        let policy = config.retry_policy();
        Self {
            queue,
            policy,
            config,
            delivery,
            notifier,
        }
    }

    /// Sweep one user's sendq.
    ///
    /// Jobs that cannot be processed right now (locked, aborted while we
    /// got to them, not yet due) are skipped; jobs whose record cannot be
    /// interpreted are logged and left in place, never deleted. Only a
    /// failure to list the queue itself aborts the sweep.
    pub fn run_user(&self, user: &str) -> Result<SweepStats> {
        let mut stats = SweepStats::default();

        for (job, record_path) in self.queue.list(user)? {
            match self.process_job(user, job, &record_path) {
                Ok(disposition) => disposition.count(&mut stats),
                Err(err) => {
                    // Leave the job in its current, retryable directory;
                    // a job is never silently dropped.
                    error!(user, job, error = %err, "leaving job in place after error");
                    stats.errored += 1;
                }
            }
        }

        debug!(user, ?stats, "sweep finished");
        Ok(stats)
    }

    /// Sweep every configured user's sendq.
    ///
    /// A failure to sweep one user (typically an unreadable queue
    /// directory) is logged and counted, and the remaining users are
    /// still swept. Returns the stats aggregated over all users.
    pub fn run_all(&self) -> SweepStats {
        let mut users: Vec<&String> = self.config.users.keys().collect();
        users.sort();

        let mut total = SweepStats::default();
        for user in users {
            match self.run_user(user) {
                Ok(stats) => total.absorb(stats),
                Err(err) => {
                    error!(user, error = %err, "skipping user after sweep error");
                    total.errored += 1;
                }
            }
        }
        total
    }

    fn process_job(&self, user: &str, job: u32, record_path: &Path) -> Result<Disposition> {
        let guard = match lock::acquire(&lock_path_for(record_path), LockMode::NonBlocking) {
            Ok(guard) => guard,
            Err(SpoolError::LockTaken { .. }) => {
                debug!(user, job, "job locked by another worker, skipping");
                return Ok(Disposition::Skipped);
            }
            Err(err) => return Err(err),
        };

        let disposition = self.process_locked(user, job, record_path);
        let released = guard.release();
        let disposition = disposition?;
        released?;
        Ok(disposition)
    }

    fn process_locked(&self, user: &str, job: u32, record_path: &Path) -> Result<Disposition> {
        // The job may have been aborted while we waited our turn.
        if !record_path.exists() {
            debug!(user, job, "job vanished before processing, skipping");
            return Ok(Disposition::Skipped);
        }

        let mut record = JobRecord::read(record_path)?;
        let now = Local::now().naive_local();
        if !record.is_due(now)? {
            return Ok(Disposition::Skipped);
        }

        let dialstring = record.require("dialstring")?.to_string();
        let request = DeliveryRequest {
            user: user.to_string(),
            dialstring: dialstring.clone(),
            payload: record.payload()?,
            outgoing_number: self
                .config
                .user(user)
                .and_then(|u| u.outgoing_number.clone()),
        };

        info!(user, job, dialstring, "delivery attempt initiated");
        let outcome = self.delivery.attempt(&request)?;
        info!(user, job, %outcome, "delivery attempt finished");

        if outcome.is_success() {
            let moved = self.queue.move_to(record_path, QueueState::Done, user)?;
            self.notifier
                .job_sent(&self.config.notify_address(user), &moved, outcome);
            return Ok(Disposition::Sent);
        }

        let tries = record.tries()? + 1;
        let delay = self.policy.next_delay(tries);
        record.set_tries(tries);
        record.set_starttime(now + Duration::seconds(delay as i64));
        record.set("cause", outcome.to_string());
        record.write()?;
        debug!(user, job, tries, delay, "job delayed");

        if self.policy.should_give_up(tries) {
            let moved = self.queue.move_to(record_path, QueueState::Failed, user)?;
            self.notifier
                .job_failed(&self.config.notify_address(user), &moved, outcome);
            warn!(user, job, tries, "job failed finally");
            return Ok(Disposition::Failed);
        }

        Ok(Disposition::Rescheduled)
    }
}

enum Disposition {
    Skipped,
    Sent,
    Rescheduled,
    Failed,
}

impl Disposition {
    fn count(&self, stats: &mut SweepStats) {
        match self {
            Self::Skipped => stats.skipped += 1,
            Self::Sent => stats.sent += 1,
            Self::Rescheduled => stats.rescheduled += 1,
            Self::Failed => stats.failed += 1,
        }
    }
}
