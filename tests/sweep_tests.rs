//! Integration tests for the retry sweep.

mod common;

use std::sync::Mutex;

use chrono::{Duration, Local};
use faxspool::config::UserConfig;
use faxspool::delivery::{DeliverFax, DeliveryOutcome, DeliveryRequest, Notifier};
use faxspool::lock::{self, lock_path_for, LockMode};
use faxspool::queue::{JobKind, JobQueue, QueueState};
use faxspool::record::JobRecord;
use faxspool::sweep::SweepRunner;
use faxspool::{Result, SpoolError};

use common::{current_user, dir_names, enqueue_fax, test_config};

/// Telephony stand-in that replays scripted outcomes and records what it
/// was asked to deliver.
#[derive(Default)]
struct ScriptedDelivery {
    outcomes: Mutex<Vec<Result<DeliveryOutcome>>>,
    requests: Mutex<Vec<DeliveryRequest>>,
}

impl ScriptedDelivery {
    fn replying(outcome: DeliveryOutcome) -> Self {
        let scripted = Self::default();
        scripted.outcomes.lock().unwrap().push(Ok(outcome));
        scripted
    }

    fn failing_transport() -> Self {
        let scripted = Self::default();
        scripted
            .outcomes
            .lock()
            .unwrap()
            .push(Err(SpoolError::Configuration("line dead".to_string())));
        scripted
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl DeliverFax for &ScriptedDelivery {
    fn attempt(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome> {
        self.requests.lock().unwrap().push(request.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop()
            .unwrap_or(Ok(DeliveryOutcome::new(0x3301, 0)))
    }
}

/// Notifier that remembers which jobs were reported, and to whom.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    failed: Mutex<Vec<(String, String)>>,
    received: Mutex<Vec<(String, String)>>,
}

impl Notifier for &RecordingNotifier {
    fn job_sent(&self, recipient: &str, record: &JobRecord, _outcome: DeliveryOutcome) {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), record.path().display().to_string()));
    }

    fn job_failed(&self, recipient: &str, record: &JobRecord, _outcome: DeliveryOutcome) {
        self.failed
            .lock()
            .unwrap()
            .push((recipient.to_string(), record.path().display().to_string()));
    }

    fn job_received(&self, recipient: &str, _record: &JobRecord, attachment: &std::path::Path) {
        self.received
            .lock()
            .unwrap()
            .push((recipient.to_string(), attachment.display().to_string()));
    }
}

fn runner<'a>(
    root: &std::path::Path,
    delivery: &'a ScriptedDelivery,
    notifier: &'a RecordingNotifier,
) -> (SweepRunner<&'a ScriptedDelivery, &'a RecordingNotifier>, JobQueue) {
    let config = test_config(root);
    let queue = JobQueue::new(config.clone(), JobKind::Fax);
    (
        SweepRunner::new(queue.clone(), config, delivery, notifier),
        queue,
    )
}

#[test]
fn successful_delivery_moves_job_to_done() {
    let root = tempfile::tempdir().unwrap();
    let delivery = ScriptedDelivery::replying(DeliveryOutcome::new(0, 0));
    let notifier = RecordingNotifier::default();
    let (runner, queue) = runner(root.path(), &delivery, &notifier);
    let user = current_user();

    enqueue_fax(&queue, &user, "+49123");
    let stats = runner.run_user(&user).unwrap();

    assert_eq!(stats.sent, 1);
    assert_eq!(
        dir_names(&queue, &user, QueueState::Done),
        vec![
            format!("{user}-fax-001.sff"),
            format!("{user}-fax-001.txt")
        ]
    );
    assert!(queue.list(&user).unwrap().is_empty());
    assert_eq!(notifier.sent.lock().unwrap().len(), 1);

    // The request carried the record's dialstring and payload.
    let requests = delivery.requests.lock().unwrap();
    assert_eq!(requests[0].dialstring, "+49123");
    assert!(requests[0].payload.ends_with("fax-001.sff"));
}

#[test]
fn busy_destination_counts_as_success() {
    // 0x3480 (normal call clearing) with zero B3 cause is in the success set.
    let root = tempfile::tempdir().unwrap();
    let delivery = ScriptedDelivery::replying(DeliveryOutcome::new(0x3480, 0));
    let notifier = RecordingNotifier::default();
    let (runner, queue) = runner(root.path(), &delivery, &notifier);
    let user = current_user();

    enqueue_fax(&queue, &user, "+49123");
    let stats = runner.run_user(&user).unwrap();
    assert_eq!(stats.sent, 1);
}

#[test]
fn failed_delivery_is_rescheduled_with_backoff() {
    let root = tempfile::tempdir().unwrap();
    let delivery = ScriptedDelivery::replying(DeliveryOutcome::new(0x3301, 0));
    let notifier = RecordingNotifier::default();
    let (runner, queue) = runner(root.path(), &delivery, &notifier);
    let user = current_user();

    enqueue_fax(&queue, &user, "+49123");
    let stats = runner.run_user(&user).unwrap();
    assert_eq!(stats.rescheduled, 1);

    let record_path = queue.record_path(&user, 1);
    let record = JobRecord::read(&record_path).unwrap();
    assert_eq!(record.tries().unwrap(), 1);
    assert_eq!(record.get("cause"), Some("0x3301/0x0"));

    // First delay in the test table is 60s, so the job is not due now.
    let now = Local::now().naive_local();
    assert!(!record.is_due(now).unwrap());
    assert!(record.starttime().unwrap() <= now + Duration::seconds(61));
}

#[test]
fn rescheduled_job_is_skipped_until_due() {
    let root = tempfile::tempdir().unwrap();
    let delivery = ScriptedDelivery::replying(DeliveryOutcome::new(0x3301, 0));
    let notifier = RecordingNotifier::default();
    let (runner, queue) = runner(root.path(), &delivery, &notifier);
    let user = current_user();

    enqueue_fax(&queue, &user, "+49123");
    runner.run_user(&user).unwrap();
    assert_eq!(delivery.request_count(), 1);

    // Second sweep: the job exists but its starttime is in the future.
    let stats = runner.run_user(&user).unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(delivery.request_count(), 1);
}

#[test]
fn exhausted_job_moves_to_failed_and_notifies() {
    let root = tempfile::tempdir().unwrap();
    let delivery = ScriptedDelivery::replying(DeliveryOutcome::new(0x3301, 0));
    let notifier = RecordingNotifier::default();
    let (runner, queue) = runner(root.path(), &delivery, &notifier);
    let user = current_user();

    enqueue_fax(&queue, &user, "+49123");

    // Two attempts already made; max_tries is 3, so this one is final.
    let record_path = queue.record_path(&user, 1);
    let mut record = JobRecord::read(&record_path).unwrap();
    record.set_tries(2);
    record.write().unwrap();

    let stats = runner.run_user(&user).unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(
        dir_names(&queue, &user, QueueState::Failed),
        vec![
            format!("{user}-fax-001.sff"),
            format!("{user}-fax-001.txt")
        ]
    );
    assert!(queue.list(&user).unwrap().is_empty());
    assert_eq!(notifier.failed.lock().unwrap().len(), 1);

    // The relocated record carries the final try count.
    let failed_record = JobRecord::read(
        &queue
            .queue_dir(&user, QueueState::Failed)
            .join(format!("{user}-fax-001.txt")),
    )
    .unwrap();
    assert_eq!(failed_record.tries().unwrap(), 3);
}

#[test]
fn job_not_yet_due_is_skipped_without_delivery() {
    let root = tempfile::tempdir().unwrap();
    let delivery = ScriptedDelivery::default();
    let notifier = RecordingNotifier::default();
    let (runner, queue) = runner(root.path(), &delivery, &notifier);
    let user = current_user();

    enqueue_fax(&queue, &user, "+49123");
    let record_path = queue.record_path(&user, 1);
    let mut record = JobRecord::read(&record_path).unwrap();
    record.set_starttime(Local::now().naive_local() + Duration::hours(2));
    record.write().unwrap();

    let stats = runner.run_user(&user).unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(delivery.request_count(), 0);
}

#[test]
fn locked_job_is_skipped_not_waited_for() {
    let root = tempfile::tempdir().unwrap();
    let delivery = ScriptedDelivery::default();
    let notifier = RecordingNotifier::default();
    let (runner, queue) = runner(root.path(), &delivery, &notifier);
    let user = current_user();

    enqueue_fax(&queue, &user, "+49123");
    let record_path = queue.record_path(&user, 1);
    let guard = lock::acquire(&lock_path_for(&record_path), LockMode::NonBlocking).unwrap();

    let stats = runner.run_user(&user).unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(delivery.request_count(), 0);

    guard.release().unwrap();
}

#[test]
fn transport_error_leaves_job_untouched() {
    let root = tempfile::tempdir().unwrap();
    let delivery = ScriptedDelivery::failing_transport();
    let notifier = RecordingNotifier::default();
    let (runner, queue) = runner(root.path(), &delivery, &notifier);
    let user = current_user();

    enqueue_fax(&queue, &user, "+49123");
    let stats = runner.run_user(&user).unwrap();
    assert_eq!(stats.errored, 1);

    // No state change: still in sendq with zero tries, retryable.
    let record = JobRecord::read(&queue.record_path(&user, 1)).unwrap();
    assert_eq!(record.tries().unwrap(), 0);
}

#[test]
fn record_without_dialstring_is_left_in_place() {
    let root = tempfile::tempdir().unwrap();
    let delivery = ScriptedDelivery::default();
    let notifier = RecordingNotifier::default();
    let (runner, queue) = runner(root.path(), &delivery, &notifier);
    let user = current_user();

    queue
        .enqueue(
            &user,
            |payload| {
                std::fs::write(payload, b"sff data")
                    .map_err(|e| SpoolError::io("writing test payload", e))
            },
            std::collections::BTreeMap::new(),
        )
        .unwrap();

    let stats = runner.run_user(&user).unwrap();
    assert_eq!(stats.errored, 1);
    assert_eq!(queue.list(&user).unwrap().len(), 1);
    assert_eq!(delivery.request_count(), 0);
}

#[test]
fn run_all_sweeps_every_configured_user() {
    let root = tempfile::tempdir().unwrap();
    let delivery = ScriptedDelivery::default();
    delivery
        .outcomes
        .lock()
        .unwrap()
        .extend([Ok(DeliveryOutcome::new(0, 0)), Ok(DeliveryOutcome::new(0, 0))]);
    let notifier = RecordingNotifier::default();
    let user = current_user();

    let mut config = test_config(root.path());
    config.users.insert(user.clone(), UserConfig::default());
    config
        .users
        .insert("alice".to_string(), UserConfig::default());
    let queue = JobQueue::new(config.clone(), JobKind::Fax);
    let runner = SweepRunner::new(queue.clone(), config, &delivery, &notifier);

    enqueue_fax(&queue, &user, "+49123");

    // alice need not exist in passwd: the sweep itself does no lookup,
    // so her job is laid out directly.
    let alice_sendq = queue.queue_dir("alice", QueueState::Sendq);
    std::fs::create_dir_all(&alice_sendq).unwrap();
    let payload = alice_sendq.join("fax-001.sff");
    std::fs::write(&payload, b"sff data").unwrap();
    JobRecord::create_for(&payload, common::fax_fields("+49456")).unwrap();

    let stats = runner.run_all();
    assert_eq!(stats.sent, 2);
    assert!(queue.list(&user).unwrap().is_empty());
    assert!(queue.list("alice").unwrap().is_empty());
    let mut expected = vec![
        "alice-fax-001.sff".to_string(),
        "alice-fax-001.txt".to_string(),
        format!("{user}-fax-001.sff"),
        format!("{user}-fax-001.txt"),
    ];
    expected.sort();
    assert_eq!(dir_names(&queue, &user, QueueState::Done), expected);
    assert_eq!(notifier.sent.lock().unwrap().len(), 2);
}

#[test]
fn run_all_continues_past_a_failing_user() {
    let root = tempfile::tempdir().unwrap();
    let delivery = ScriptedDelivery::replying(DeliveryOutcome::new(0, 0));
    let notifier = RecordingNotifier::default();
    let user = current_user();

    // "ghost" has no sendq directory, so listing that queue fails.
    let mut config = test_config(root.path());
    config.users.insert(user.clone(), UserConfig::default());
    config
        .users
        .insert("ghost".to_string(), UserConfig::default());
    let queue = JobQueue::new(config.clone(), JobKind::Fax);
    let runner = SweepRunner::new(queue.clone(), config, &delivery, &notifier);

    enqueue_fax(&queue, &user, "+49123");

    let stats = runner.run_all();
    assert_eq!(stats.errored, 1);
    assert_eq!(stats.sent, 1);
}

#[test]
fn notifications_go_to_the_configured_address() {
    let root = tempfile::tempdir().unwrap();
    let delivery = ScriptedDelivery::replying(DeliveryOutcome::new(0, 0));
    let notifier = RecordingNotifier::default();
    let user = current_user();

    let mut config = test_config(root.path());
    config.users.insert(
        user.clone(),
        UserConfig {
            email: Some("ops@example.org".to_string()),
            ..UserConfig::default()
        },
    );
    let queue = JobQueue::new(config.clone(), JobKind::Fax);
    let runner = SweepRunner::new(queue.clone(), config, &delivery, &notifier);

    enqueue_fax(&queue, &user, "+49123");
    runner.run_user(&user).unwrap();

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "ops@example.org");
}

#[test]
fn sweep_of_empty_queue_does_nothing() {
    let root = tempfile::tempdir().unwrap();
    let delivery = ScriptedDelivery::default();
    let notifier = RecordingNotifier::default();
    let (runner, queue) = runner(root.path(), &delivery, &notifier);
    let user = current_user();
    queue.ensure_user_dirs(&user).unwrap();

    let stats = runner.run_user(&user).unwrap();
    assert_eq!(stats, Default::default());
}
