//! Shared helpers for the integration suites.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use faxspool::config::SpoolConfig;
use faxspool::queue::{JobKind, JobQueue, QueueState};

/// Spool configuration rooted in a scratch directory, with the shared
/// `done/` and `failed/` queues already created.
pub fn test_config(root: &Path) -> SpoolConfig {
    let config = SpoolConfig {
        spool_dir: root.to_path_buf(),
        fax_user_dir: root.join("users"),
        voice_user_dir: root.join("users"),
        send_tries: 3,
        send_delays: vec![60, 300, 3600],
        users: std::collections::HashMap::new(),
    };
    fs::create_dir_all(config.done_dir()).unwrap();
    fs::create_dir_all(config.failed_dir()).unwrap();
    config
}

/// The user this test process runs as; the only name that resolves in the
/// passwd database regardless of environment.
pub fn current_user() -> String {
    faxspool::unix::current_user_name().unwrap()
}

/// Control fields for a plain outbound fax job.
pub fn fax_fields(dialstring: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    fields.insert("dialstring".to_string(), dialstring.to_string());
    fields
}

/// Enqueue one fax job with a trivial converter, returning its number.
pub fn enqueue_fax(queue: &JobQueue, user: &str, dialstring: &str) -> u32 {
    queue
        .enqueue(
            user,
            |payload| {
                fs::write(payload, b"sff data")
                    .map_err(|e| faxspool::SpoolError::io("writing test payload", e))
            },
            fax_fields(dialstring),
        )
        .unwrap()
}

/// Names of all entries in the given queue directory for `user`.
pub fn dir_names(queue: &JobQueue, user: &str, state: QueueState) -> Vec<String> {
    let dir = queue.queue_dir(user, state);
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// A fax queue over a fresh config.
pub fn fax_queue(root: &Path) -> JobQueue {
    JobQueue::new(test_config(root), JobKind::Fax)
}
