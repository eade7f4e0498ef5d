//! Per-invocation result records.
//!
//! Every plugin invocation gets a fresh [`ExecutionLog`] which the plugin
//! fills in place. The runner inspects `status` to decide whether the
//! pipeline continues.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a successful invocation
pub const SUCCESS_STATUS: i32 = 0;

/// The plugin panicked or returned an error instead of reporting a status
pub const FAULT_STATUS: i32 = -1;

/// The stage (or the run as a whole) exceeded its time limit
pub const TIMEOUT_STATUS: i32 = -2;

/// The stage was not invoked because the stage it depends on never ran
pub const SKIPPED_STATUS: i32 = -3;

/// Result record of a single plugin invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLog {
    /// Canonical key of the plugin that produced this log
    pub stage: String,

    /// Configuration section the options were drawn from
    pub section: String,

    /// 0 on success, anything else is a failure code
    pub status: i32,

    /// Captured standard output
    #[serde(default)]
    pub stdout: String,

    /// Captured standard error (or failure explanation)
    #[serde(default)]
    pub stderr: String,

    /// Free-form metadata, including pass-through option keys
    #[serde(default)]
    pub extra: BTreeMap<String, String>,

    /// When the invocation started
    pub started_at: Option<DateTime<Utc>>,

    /// When the invocation finished
    pub finished_at: Option<DateTime<Utc>>,

    /// Wall-clock duration in milliseconds
    pub duration_ms: Option<u64>,
}

impl ExecutionLog {
    /// Create a fresh log for a plugin bound to a configuration section
    pub fn new(stage: impl Into<String>, section: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            section: section.into(),
            ..Default::default()
        }
    }

    /// Whether the invocation succeeded
    pub fn is_success(&self) -> bool {
        self.status == SUCCESS_STATUS
    }

    /// Whether the status is one the runner assigned rather than the plugin
    pub fn is_distinguished(&self) -> bool {
        matches!(self.status, FAULT_STATUS | TIMEOUT_STATUS | SKIPPED_STATUS)
    }

    /// Mark the log as failed with the given status and message
    pub fn fail(&mut self, status: i32, stderr: impl Into<String>) {
        self.status = status;
        self.stderr = stderr.into();
    }

    /// Attach a metadata entry
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Human-readable label for a status code
pub fn describe_status(status: i32) -> String {
    match status {
        SUCCESS_STATUS => "ok".to_string(),
        FAULT_STATUS => "fault".to_string(),
        TIMEOUT_STATUS => "timeout".to_string(),
        SKIPPED_STATUS => "skipped".to_string(),
        other => format!("failed ({})", other),
    }
}
