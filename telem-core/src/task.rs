//! The persisted task record and its pure value operations.
//!
//! A [`Task`] is both the wire representation (JSON, PascalCase field names,
//! absent fields omitted) and the stored representation (the same JSON blob
//! keyed by the textual UUID). All fields are optional so that request
//! validation can distinguish "caller supplied this field" from "absent".

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Expiration timestamps are UTC, 24-hour notation, second precision.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Marker in `Command`/`Shell` entries that is replaced with the task's
/// `include/` directory path at admission.
pub const TASK_DIR_INCLUDE_MARKER: &str = "{TASK_DIR_INCLUDE}";

pub const STDOUT_FILE_SUFFIX: &str = ".stdout.txt";
pub const STDERR_FILE_SUFFIX: &str = ".stderr.txt";

const TASK_DATA_DIRECTORY: &str = "taskdata";
const INCLUDE_DIRECTORY: &str = "include";

/// Status names indexed by the stored integer encoding.
/// The encoding is persisted and CANNOT be reordered; add new values at the end.
const STATUS_NAMES: [&str; 6] = [
    "Accepted",
    "Canceled",
    "Canceling",
    "Completed",
    "Expired",
    "Running",
];

/// Lifecycle state of a [`Task`].
///
/// Serialized as its integer discriminant, both on the wire and in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    Accepted = 0,
    Canceled = 1,
    Canceling = 2,
    Completed = 3,
    Expired = 4,
    Running = 5,
}

impl TaskStatus {
    /// The stored integer encoding.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TaskStatus::Accepted),
            1 => Some(TaskStatus::Canceled),
            2 => Some(TaskStatus::Canceling),
            3 => Some(TaskStatus::Completed),
            4 => Some(TaskStatus::Expired),
            5 => Some(TaskStatus::Running),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        STATUS_NAMES[self as usize]
    }

    /// Returns `true` if the status never transitions again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Canceled | TaskStatus::Completed | TaskStatus::Expired
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        TaskStatus::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid task status code {code}")))
    }
}

#[derive(Debug, Error)]
pub enum ExpirationError {
    #[error("task has no expiration")]
    Missing,
    #[error("invalid expiration timestamp: {0}")]
    Parse(#[from] chrono::ParseError),
}

/// A unit of work: identity, schedule, workload, and progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    /// Assigned on create; identity, store key, and on-disk directory name.
    #[serde(rename = "UUID", skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,

    /// Output only; clients never supply a status.
    #[serde(rename = "Status", skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,

    /// See [`DATE_FORMAT`]. Defaulted at admission; never absent once stored.
    #[serde(rename = "Expiration", skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,

    /// Only valid on a cancel request, and only with the value `true`.
    #[serde(rename = "Cancel", skip_serializing_if = "Option::is_none")]
    pub cancel: Option<bool>,

    /// Lines split on whitespace and executed without a shell.
    #[serde(rename = "Command", skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Lines handed to a shell for interpretation.
    #[serde(rename = "Shell", skip_serializing_if = "Option::is_none")]
    pub shell: Option<Vec<String>>,

    /// Host paths or glob patterns to include in the archive; directories
    /// are included recursively.
    #[serde(rename = "File", skip_serializing_if = "Option::is_none")]
    pub file: Option<Vec<String>>,

    /// When set, only files modified within this many seconds of archive
    /// production are included.
    #[serde(rename = "FileModifiedSeconds", skip_serializing_if = "Option::is_none")]
    pub file_modified_seconds: Option<i64>,

    #[serde(rename = "ProcessCommand", skip_serializing_if = "Option::is_none")]
    pub process_command: Option<Vec<String>>,

    #[serde(rename = "ProcessShell", skip_serializing_if = "Option::is_none")]
    pub process_shell: Option<Vec<String>>,

    #[serde(rename = "ProcessZip", skip_serializing_if = "Option::is_none")]
    pub process_zip: Option<Vec<String>>,

    #[serde(rename = "ProcessError", skip_serializing_if = "Option::is_none")]
    pub process_error: Option<Vec<String>>,
}

impl Task {
    /// The store key. Empty when no UUID has been assigned yet.
    pub fn key(&self) -> String {
        self.uuid.map(|u| u.to_string()).unwrap_or_default()
    }

    /// Data directory for the task: `<persistent_dir>/taskdata/<key>`.
    pub fn dir(&self, persistent_dir: &Path) -> PathBuf {
        persistent_dir.join(TASK_DATA_DIRECTORY).join(self.key())
    }

    /// Client-visible scratch directory inside the task directory.
    pub fn include_dir(&self, persistent_dir: &Path) -> PathBuf {
        self.dir(persistent_dir).join(INCLUDE_DIRECTORY)
    }

    /// Path of the output archive: `<dir>/<key>.zip`.
    pub fn zip_path(&self, persistent_dir: &Path) -> PathBuf {
        self.dir(persistent_dir).join(format!("{}.zip", self.key()))
    }

    /// Parse the expiration into an instant.
    pub fn expiration_instant(&self) -> Result<DateTime<Utc>, ExpirationError> {
        let raw = self.expiration.as_deref().ok_or(ExpirationError::Missing)?;
        let naive = NaiveDateTime::parse_from_str(raw, DATE_FORMAT)?;
        Ok(Utc.from_utc_datetime(&naive))
    }

    /// Whether the task is past its expiration. Unparseable or missing
    /// expirations are reported (stored tasks always carry one) and treated
    /// as not expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiration_instant() {
            Ok(expiration) => now > expiration,
            Err(e) => {
                warn!(task = %self.key(), error = %e, "task expiration unreadable");
                false
            }
        }
    }

    /// Replace [`TASK_DIR_INCLUDE_MARKER`] in every command and shell line
    /// with the task's include directory path.
    pub fn substitute_include_dir(&mut self, persistent_dir: &Path) {
        let include = self.include_dir(persistent_dir).display().to_string();
        for list in [&mut self.command, &mut self.shell] {
            if let Some(entries) = list {
                for entry in entries.iter_mut() {
                    if entry.contains(TASK_DIR_INCLUDE_MARKER) {
                        *entry = entry.replace(TASK_DIR_INCLUDE_MARKER, &include);
                    }
                }
            }
        }
    }

    /// Value equality with an expiration tolerance.
    ///
    /// Two tasks are equal when the UUIDs match, the expirations differ by at
    /// most `tolerance`, every scalar field is equal (both absent counts as
    /// equal), and every list field matches in presence, length, and content.
    /// A task created with a defaulted expiration can be compared against an
    /// expected value without knowing the exact instant it was stamped.
    pub fn equal(&self, other: &Task, tolerance: TimeDelta) -> bool {
        let (mine, theirs) = match (self.expiration_instant(), other.expiration_instant()) {
            (Ok(a), Ok(b)) => (a, b),
            (a, b) => {
                warn!(left = ?a.err(), right = ?b.err(), "equality check on unparseable expiration");
                return false;
            }
        };
        self.uuid == other.uuid
            && (mine - theirs).abs() <= tolerance
            && self.status == other.status
            && self.cancel == other.cancel
            && self.file_modified_seconds == other.file_modified_seconds
            && self.command == other.command
            && self.shell == other.shell
            && self.file == other.file
            && self.process_command == other.process_command
            && self.process_shell == other.process_shell
            && self.process_zip == other.process_zip
            && self.process_error == other.process_error
    }

    /// Append one entry to the error log.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.process_error
            .get_or_insert_with(Vec::new)
            .push(message.into());
    }
}

/// Derive a filesystem-safe output filename from a command line.
///
/// Runs of shell metacharacters and whitespace collapse into a single
/// underscore, so each step maps to a stable, readable stem.
pub fn filename_from_command(command: &str) -> String {
    const UNSAFE: &str = "`~!@#$%^&*()+={[}]|?\\/><,.';:\"";
    let mut out = String::with_capacity(command.len());
    let mut in_run = false;
    for ch in command.chars() {
        if UNSAFE.contains(ch) || ch.is_whitespace() {
            if !in_run {
                out.push('_');
                in_run = true;
            }
        } else {
            out.push(ch);
            in_run = false;
        }
    }
    out
}
