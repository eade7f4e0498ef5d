//! Run state and reconstruction from journal events.
//!
//! A run is one pass of the pipeline over the registered stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventType};
use super::log::ExecutionLog;

/// State of a pipeline run.
///
/// `NotStarted → Running → Completed | AbortedAt`. The last two are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Nothing has executed yet
    NotStarted,

    /// Stage at `stage_index` is executing
    Running { stage_index: usize },

    /// Every stage was visited
    Completed,

    /// The run stopped at the stage at `stage_index`
    AbortedAt { stage_index: usize, stage: String },
}

impl Default for RunState {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl RunState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::AbortedAt { .. })
    }

    /// Move to `next` unless the state is already terminal.
    ///
    /// Returns whether the transition happened.
    pub fn advance(&mut self, next: RunState) -> bool {
        if self.is_terminal() {
            return false;
        }
        *self = next;
        true
    }
}

/// A run as reconstructed from its journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Name of the run definition
    pub name: String,

    /// Current state of the run
    pub state: RunState,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Logs of every stage that finished, in execution order
    pub logs: Vec<ExecutionLog>,
}

impl RunRecord {
    /// Reconstruct a run from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut run = Self {
            id: first_event.run_id,
            name: String::new(),
            state: RunState::NotStarted,
            started_at: first_event.timestamp,
            completed_at: None,
            logs: Vec::new(),
        };

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                self.name = event.summary.clone();
                self.started_at = event.timestamp;
            }
            EventType::StageStarted => {
                if let Some(stage_index) = event.stage_index {
                    self.state.advance(RunState::Running { stage_index });
                }
            }
            EventType::StageCompleted | EventType::StageFailed => {
                if let Some(ref log) = event.log {
                    self.logs.push(log.clone());
                }
            }
            EventType::RunCompleted => {
                if self.state.advance(RunState::Completed) {
                    self.completed_at = Some(event.timestamp);
                }
            }
            EventType::RunAborted => {
                let next = RunState::AbortedAt {
                    stage_index: event.stage_index.unwrap_or_default(),
                    stage: event.stage.clone().unwrap_or_default(),
                };
                if self.state.advance(next) {
                    self.completed_at = Some(event.timestamp);
                }
            }
        }
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        !self.state.is_terminal()
    }

    /// First stage log with a non-zero status
    pub fn first_failure(&self) -> Option<&ExecutionLog> {
        self.logs.iter().find(|l| !l.is_success())
    }
}
