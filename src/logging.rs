//! Structured logging setup.
//!
//! Console output filtered through `FAXSPOOL_LOG`, plus an optional JSON
//! file layer when `FAXSPOOL_LOG_DIR` is set (one file per process, so
//! concurrent sweep processes never interleave writes).

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize logging once per process.
///
/// Safe to call repeatedly; later calls are no-ops, and an already-set
/// global subscriber (e.g. from an embedding application) is tolerated.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = || {
            EnvFilter::try_from_env("FAXSPOOL_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
        };

        let console = fmt::layer()
            .with_target(true)
            .with_filter(filter());

        let file = std::env::var("FAXSPOOL_LOG_DIR").ok().map(|dir| {
            let log_dir = PathBuf::from(dir);
            if !log_dir.exists() {
                let _ = fs::create_dir_all(&log_dir);
            }
            let filename = format!(
                "faxspool.{}.{}.log",
                process::id(),
                Utc::now().format("%Y%m%d_%H%M%S")
            );
            let appender = tracing_appender::rolling::never(&log_dir, filename);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // Keep the flush guard alive for the process lifetime.
            std::mem::forget(guard);
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json()
                .with_filter(filter())
        });

        let subscriber = tracing_subscriber::registry().with(console).with(file);
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }
    });
}
