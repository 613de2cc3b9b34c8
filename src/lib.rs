//! # Faxspool
//!
//! Durable, crash-safe, file-based job spool for outbound fax and voice
//! delivery, plus the retry sweep that drives it.
//!
//! ## Overview
//!
//! The spool is a plain directory tree: each queue state (`sendq`,
//! `done`, `failed`, `received`) is a directory, each job is a payload
//! file (SFF fax image or A-law audio) plus a small text record beside
//! it, and state transitions are renames. No index or database exists
//! besides the tree itself, which makes the store safe for multiple
//! independent processes - one per active call plus a periodic retry
//! sweep - coordinating purely through advisory locks and atomic renames.
//!
//! The actual telephony work (CAPI signalling, codecs, T.30) lives in a
//! native core reached through the [`delivery::DeliverFax`] trait; this
//! crate owns everything around it: id allocation, record persistence,
//! locking, queue transitions and retry scheduling.
//!
//! ## Module Organization
//!
//! - [`lock`] - advisory per-path file locks
//! - [`allocator`] - unique job id / filename allocation
//! - [`record`] - job record parsing and persistence
//! - [`queue`] - directory-backed queue operations
//! - [`retry`] - retry delay table and give-up policy
//! - [`sweep`] - the periodic retry sweep driver
//! - [`delivery`] - seams to the telephony core and the notifier
//! - [`config`] - spool configuration
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use faxspool::config::SpoolConfig;
//! use faxspool::queue::{JobKind, JobQueue};
//!
//! # fn example() -> faxspool::error::Result<()> {
//! let config = SpoolConfig::from_env()?;
//! let queue = JobQueue::new(config, JobKind::Fax);
//!
//! let mut fields = BTreeMap::new();
//! fields.insert("dialstring".to_string(), "+4912345".to_string());
//! let job = queue.enqueue("alice", |payload| {
//!     std::fs::write(payload, b"converted fax data")
//!         .map_err(|e| faxspool::error::SpoolError::io("writing payload", e))
//! }, fields)?;
//! println!("enqueued job {job}");
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod config;
pub mod delivery;
pub mod error;
pub mod lock;
pub mod logging;
pub mod queue;
pub mod record;
pub mod retry;
pub mod sweep;
pub mod unix;

pub use config::{SpoolConfig, UserConfig};
pub use delivery::{DeliverFax, DeliveryOutcome, DeliveryRequest, LogNotifier, Notifier};
pub use error::{Result, SpoolError};
pub use lock::{lock_path_for, LockGuard, LockMode};
pub use queue::{JobKind, JobQueue, QueueState};
pub use record::JobRecord;
pub use retry::RetryPolicy;
pub use sweep::{SweepRunner, SweepStats};
