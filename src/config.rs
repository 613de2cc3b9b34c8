//! Spool configuration.
//!
//! An explicit configuration object passed into each component, with
//! lifecycle scoped to the driver process. Values can come from a config
//! file (TOML, via the `config` crate), from `FAXSPOOL_*` environment
//! variables, or from the defaults below.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpoolError};
use crate::retry::RetryPolicy;

/// Per-user overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Outgoing number (MSN) presented on delivery attempts.
    pub outgoing_number: Option<String>,
    /// Default dialstring for enqueued jobs.
    pub dialstring: Option<String>,
    /// Notification address; the user name itself when unset.
    pub email: Option<String>,
}

/// Top-level configuration for the spool tree and retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    /// Root of the spool tree; `done/` and `failed/` live directly below.
    pub spool_dir: PathBuf,
    /// Per-user fax directories (`<fax_user_dir>/<user>/sendq` etc.).
    pub fax_user_dir: PathBuf,
    /// Per-user voice directories.
    pub voice_user_dir: PathBuf,
    /// Total delivery attempts before a job fails finally.
    pub send_tries: u32,
    /// Retry delay table in seconds; the last entry repeats forever.
    pub send_delays: Vec<u64>,
    /// Per-user overrides keyed by user name.
    pub users: HashMap<String, UserConfig>,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            spool_dir: PathBuf::from("/var/spool/faxspool"),
            fax_user_dir: PathBuf::from("/var/spool/faxspool/users"),
            voice_user_dir: PathBuf::from("/var/spool/faxspool/users"),
            send_tries: 10,
            send_delays: vec![60, 60, 60, 300, 300, 3600, 3600, 18000, 36000, 86400],
            users: HashMap::new(),
        }
    }
}

impl SpoolConfig {
    /// Load from a TOML file, with `FAXSPOOL_*` environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let loaded: Self = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(config::Environment::with_prefix("FAXSPOOL"))
            .build()
            .map_err(|e| SpoolError::Configuration(e.to_string()))?
            .try_deserialize()
            .map_err(|e| SpoolError::Configuration(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Defaults plus `FAXSPOOL_*` environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("FAXSPOOL_SPOOL_DIR") {
            config.spool_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("FAXSPOOL_FAX_USER_DIR") {
            config.fax_user_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("FAXSPOOL_VOICE_USER_DIR") {
            config.voice_user_dir = PathBuf::from(dir);
        }
        if let Ok(tries) = std::env::var("FAXSPOOL_SEND_TRIES") {
            config.send_tries = tries
                .parse()
                .map_err(|e| SpoolError::Configuration(format!("invalid send_tries: {e}")))?;
        }
        if let Ok(delays) = std::env::var("FAXSPOOL_SEND_DELAYS") {
            config.send_delays = delays
                .split(',')
                .map(|d| d.trim().parse())
                .collect::<std::result::Result<Vec<u64>, _>>()
                .map_err(|e| SpoolError::Configuration(format!("invalid send_delays: {e}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.send_tries == 0 {
            return Err(SpoolError::Configuration(
                "send_tries must be at least 1".to_string(),
            ));
        }
        if self.send_delays.is_empty() {
            return Err(SpoolError::Configuration(
                "send_delays must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The retry policy this configuration describes.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.send_delays.clone(), self.send_tries)
    }

    /// Per-user overrides, when configured.
    pub fn user(&self, name: &str) -> Option<&UserConfig> {
        self.users.get(name)
    }

    /// Notification address for `name`: the configured email, or the user
    /// name itself when none is set (local delivery).
    pub fn notify_address(&self, name: &str) -> String {
        self.users
            .get(name)
            .and_then(|u| u.email.clone())
            .unwrap_or_else(|| name.to_string())
    }

    /// Queue directory for jobs that were delivered successfully.
    pub fn done_dir(&self) -> PathBuf {
        self.spool_dir.join("done")
    }

    /// Queue directory for jobs that failed finally.
    pub fn failed_dir(&self) -> PathBuf {
        self.spool_dir.join("failed")
    }
}
