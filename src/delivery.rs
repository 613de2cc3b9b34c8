//! Seams to the external collaborators.
//!
//! The native telephony core performs the actual delivery attempt; the
//! mail layer renders and sends notifications. Both are reached through
//! traits here so the queue and sweep logic never depend on CAPI or SMTP
//! details and tests can substitute recorders.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::record::JobRecord;

/// Primary disconnect causes that count as a successful delivery when the
/// secondary (B3) cause is zero.
pub const SUCCESS_CAUSES: [u32; 5] = [0x0000, 0x3400, 0x3480, 0x3490, 0x349F];

/// The two numeric disconnect causes a delivery attempt ends with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub cause: u32,
    pub cause_b3: u32,
}

impl DeliveryOutcome {
    pub fn new(cause: u32, cause_b3: u32) -> Self {
        Self { cause, cause_b3 }
    }

    /// Whether the attempt delivered the payload.
    ///
    /// Any combination outside the success set is a failure; mapping the
    /// codes to messages is owned by the telephony side.
    pub fn is_success(&self) -> bool {
        self.cause_b3 == 0 && SUCCESS_CAUSES.contains(&self.cause)
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}/0x{:x}", self.cause, self.cause_b3)
    }
}

/// Everything the telephony core needs for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    /// Owning user, for per-user defaults on the telephony side.
    pub user: String,
    /// Destination to dial.
    pub dialstring: String,
    /// Media file to transmit.
    pub payload: PathBuf,
    /// Outgoing number (MSN) to present, when configured.
    pub outgoing_number: Option<String>,
}

/// The native telephony core.
pub trait DeliverFax {
    /// Perform one delivery attempt; errors are transport-level failures
    /// (no outcome codes were obtained) and leave the job untouched.
    fn attempt(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome>;
}

/// Delivery notifications; composition and transport live elsewhere.
///
/// `recipient` is the already-resolved notification address for the
/// owning user ([`crate::config::SpoolConfig::notify_address`]), so
/// implementations never consult the configuration themselves.
pub trait Notifier {
    fn job_sent(&self, recipient: &str, record: &JobRecord, outcome: DeliveryOutcome);
    fn job_failed(&self, recipient: &str, record: &JobRecord, outcome: DeliveryOutcome);
    /// An incoming fax or voice message was stored; `attachment` is the
    /// payload file to deliver alongside the notification.
    fn job_received(&self, recipient: &str, record: &JobRecord, attachment: &Path);
}

/// Notifier that only writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn job_sent(&self, recipient: &str, record: &JobRecord, outcome: DeliveryOutcome) {
        info!(
            recipient,
            record = %record.path().display(),
            %outcome,
            "job sent successfully"
        );
    }

    fn job_failed(&self, recipient: &str, record: &JobRecord, outcome: DeliveryOutcome) {
        info!(
            recipient,
            record = %record.path().display(),
            %outcome,
            "job failed finally"
        );
    }

    fn job_received(&self, recipient: &str, record: &JobRecord, attachment: &Path) {
        info!(
            recipient,
            record = %record.path().display(),
            attachment = %attachment.display(),
            "incoming message stored"
        );
    }
}
