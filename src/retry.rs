//! Retry scheduling policy.
//!
//! Pure decisions, no I/O: when the next delivery attempt for a failed
//! job may start and when to stop trying. The driver owns the clock and
//! the job state; this module only maps a try counter onto the configured
//! delay table.

use serde::{Deserialize, Serialize};

/// Delay table plus attempt limit for one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Seconds to wait before each retry; the last entry repeats forever.
    pub delays: Vec<u64>,
    /// Total number of attempts a job gets before it fails finally.
    pub max_tries: u32,
}

impl RetryPolicy {
    pub fn new(delays: Vec<u64>, max_tries: u32) -> Self {
        Self { delays, max_tries }
    }

    /// Delay in seconds before the next attempt, given the 1-based try
    /// counter *after* the attempt just made was counted.
    ///
    /// Indices beyond the table clamp to its last (largest) entry, so the
    /// system keeps retrying at the maximum configured interval instead
    /// of erroring once the table is exhausted.
    pub fn next_delay(&self, tries: u32) -> u64 {
        if self.delays.is_empty() {
            return 0;
        }
        let index = (tries.max(1) as usize).min(self.delays.len()) - 1;
        self.delays[index]
    }

    /// Whether the job has used up its attempts.
    ///
    /// Evaluated strictly after incrementing the try counter, so
    /// `max_tries = 10` yields exactly ten attempts, failing finally on
    /// the tenth.
    pub fn should_give_up(&self, tries: u32) -> bool {
        tries >= self.max_tries
    }
}
