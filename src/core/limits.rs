//! Time limits for pipeline execution.
//!
//! Two independent watchdogs:
//! - a per-stage timeout wrapping each `execute` call
//! - a whole-run duration limit checked before each stage starts

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Time limits for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLimits {
    /// Per-stage timeout in seconds (unlimited if not set)
    #[serde(default)]
    pub stage_timeout_seconds: Option<u64>,

    /// Total run duration in seconds (unlimited if not set)
    #[serde(default)]
    pub run_timeout_seconds: Option<u64>,
}

impl RunLimits {
    /// Effective timeout for a stage, preferring the stage's own limit
    pub fn stage_timeout(&self, stage_override: Option<Duration>) -> Option<Duration> {
        stage_override.or(self.stage_timeout_seconds.map(Duration::from_secs))
    }

    /// Check the tracker against the run duration limit
    pub fn check(&self, tracker: &RunTracker) -> Result<(), LimitViolation> {
        if let Some(limit_seconds) = self.run_timeout_seconds {
            let elapsed_seconds = tracker.elapsed_seconds();
            if elapsed_seconds >= limit_seconds {
                return Err(LimitViolation::RunTimeout {
                    elapsed_seconds,
                    limit_seconds,
                });
            }
        }
        Ok(())
    }

    /// Fill unset limits from `fallback`
    pub fn or(self, fallback: &RunLimits) -> RunLimits {
        RunLimits {
            stage_timeout_seconds: self.stage_timeout_seconds.or(fallback.stage_timeout_seconds),
            run_timeout_seconds: self.run_timeout_seconds.or(fallback.run_timeout_seconds),
        }
    }
}

/// Tracks progress during a run
#[derive(Debug, Clone)]
pub struct RunTracker {
    /// Number of stages invoked
    pub stages_executed: u32,

    /// When the run started
    pub started_at: Instant,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    /// Create a new tracker
    pub fn new() -> Self {
        Self {
            stages_executed: 0,
            started_at: Instant::now(),
        }
    }

    /// Create a tracker as if the run had started `elapsed` ago
    pub fn started_ago(elapsed: Duration) -> Self {
        Self {
            stages_executed: 0,
            started_at: Instant::now()
                .checked_sub(elapsed)
                .unwrap_or_else(Instant::now),
        }
    }

    /// Record a stage invocation
    pub fn record_stage(&mut self) {
        self.stages_executed += 1;
    }

    /// Get elapsed time in seconds
    pub fn elapsed_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Limit violation errors
#[derive(Debug, Clone, Error)]
pub enum LimitViolation {
    #[error("Stage '{stage}' timed out after {limit:?}")]
    StageTimeout { stage: String, limit: Duration },

    #[error("Run timeout: {elapsed_seconds}s >= {limit_seconds}s")]
    RunTimeout {
        elapsed_seconds: u64,
        limit_seconds: u64,
    },
}
