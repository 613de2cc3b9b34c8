//! Job record persistence.
//!
//! A job record is the small structured text file describing one queued
//! fax or voice item: a flat map of string fields under a `[GLOBAL]`
//! heading, one `key="value"` pair per line. The payload file and its
//! record always live in the same directory, and the record's `filename`
//! field points at the current location of the payload.
//!
//! On-disk example:
//!
//! ```text
//! [GLOBAL]
//! dialstring="+49123456"
//! filename="/var/spool/faxspool/users/alice/sendq/fax-003.sff"
//! starttime="Fri Aug 29 10:02:17 2026"
//! tries="0"
//! user="alice"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};

use crate::error::{Result, SpoolError};

/// Heading opening the single field section of a record file.
pub const GLOBAL_SECTION: &str = "[GLOBAL]";

/// On-disk timestamp format of `starttime`/`time` fields (ctime style).
pub const TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Derive the record path for a payload path (`foo.sff` -> `foo.txt`).
pub fn record_path_for(payload: &Path) -> PathBuf {
    payload.with_extension("txt")
}

/// One persisted job description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    path: PathBuf,
    fields: BTreeMap<String, String>,
}

impl JobRecord {
    /// Read a record file.
    ///
    /// A missing file surfaces as an I/O error; a present but malformed
    /// file (no `[GLOBAL]` heading, or a line that is not a `key=value`
    /// pair) fails with [`SpoolError::MalformedRecord`]. A corrupt record
    /// cannot be safely interpreted, so nothing is default-filled.
    pub fn read(path: &Path) -> Result<JobRecord> {
        let content = fs::read_to_string(path)
            .map_err(|e| SpoolError::io(format!("reading job record {}", path.display()), e))?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<JobRecord> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        match lines.next() {
            Some(line) if line.trim() == GLOBAL_SECTION => {}
            _ => {
                return Err(SpoolError::MalformedRecord {
                    path: path.to_path_buf(),
                    detail: "section [GLOBAL] missing".to_string(),
                });
            }
        }

        let mut fields = BTreeMap::new();
        for line in lines {
            let Some((key, value)) = line.split_once('=') else {
                return Err(SpoolError::MalformedRecord {
                    path: path.to_path_buf(),
                    detail: format!("not a key=\"value\" line: {line}"),
                });
            };
            fields.insert(key.trim().to_string(), unquote(value.trim()).to_string());
        }

        Ok(JobRecord {
            path: path.to_path_buf(),
            fields,
        })
    }

    /// Create and persist a record next to `payload`.
    ///
    /// The record path is derived by suffix substitution. Defaults
    /// `tries=0` and `starttime=now` are seeded when the caller did not
    /// supply them; `filename` is always set to the payload path.
    pub fn create_for(payload: &Path, fields: BTreeMap<String, String>) -> Result<JobRecord> {
        let mut record = JobRecord {
            path: record_path_for(payload),
            fields,
        };
        record
            .fields
            .entry("tries".to_string())
            .or_insert_with(|| "0".to_string());
        record
            .fields
            .entry("starttime".to_string())
            .or_insert_with(|| Local::now().format(TIME_FORMAT).to_string());
        record.fields.insert(
            "filename".to_string(),
            payload.display().to_string(),
        );
        record.write()?;
        Ok(record)
    }

    /// Rewrite the record at its current path.
    pub fn write(&self) -> Result<()> {
        let mut out = String::from(GLOBAL_SECTION);
        out.push('\n');
        for (key, value) in &self.fields {
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(value);
            out.push_str("\"\n");
        }
        fs::write(&self.path, out)
            .map_err(|e| SpoolError::io(format!("writing job record {}", self.path.display()), e))
    }

    /// Current location of the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Relocate the in-memory record (used after a queue transition).
    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    /// All fields, in deterministic order.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Fetch a required field, failing with [`SpoolError::MissingField`].
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| SpoolError::MissingField {
            field: key.to_string(),
            path: self.path.clone(),
        })
    }

    /// Current location of the payload file (required `filename` field).
    pub fn payload(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.require("filename")?))
    }

    /// Number of delivery attempts made so far.
    pub fn tries(&self) -> Result<u32> {
        let raw = self.require("tries")?;
        raw.parse().map_err(|_| SpoolError::MalformedRecord {
            path: self.path.clone(),
            detail: format!("tries is not a number: {raw}"),
        })
    }

    pub fn set_tries(&mut self, tries: u32) {
        self.set("tries", tries.to_string());
    }

    /// Earliest time the next delivery attempt may start.
    pub fn starttime(&self) -> Result<NaiveDateTime> {
        let raw = self.require("starttime")?;
        NaiveDateTime::parse_from_str(raw, TIME_FORMAT).map_err(|_| {
            SpoolError::MalformedRecord {
                path: self.path.clone(),
                detail: format!("unparsable starttime: {raw}"),
            }
        })
    }

    pub fn set_starttime(&mut self, when: NaiveDateTime) {
        self.set("starttime", when.format(TIME_FORMAT).to_string());
    }

    /// Whether the job is due for a delivery attempt at `now`.
    pub fn is_due(&self, now: NaiveDateTime) -> Result<bool> {
        Ok(self.starttime()? <= now)
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
