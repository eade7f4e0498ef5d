//! Event types for the run journal.
//!
//! Every state change of a run is recorded as an immutable event in an
//! append-only log, so a finished run can be inspected after the process
//! that executed it has exited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::log::ExecutionLog;

/// A single event in the append-only run journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Stage key (if applicable)
    pub stage: Option<String>,

    /// Position of the stage in the execution order (if applicable)
    pub stage_index: Option<usize>,

    /// Type of event
    pub event_type: EventType,

    /// Human-readable summary
    pub summary: String,

    /// Result record for stage completion events
    pub log: Option<ExecutionLog>,

    /// Digest of the run definition (run start only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_hash: Option<String>,
}

impl Event {
    /// Create a new run-level event with the current timestamp
    pub fn new(run_id: Uuid, event_type: EventType, summary: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            stage: None,
            stage_index: None,
            event_type,
            summary,
            log: None,
            definition_hash: None,
        }
    }

    /// Attach the stage this event concerns
    pub fn for_stage(mut self, stage: impl Into<String>, index: usize) -> Self {
        self.stage = Some(stage.into());
        self.stage_index = Some(index);
        self
    }

    /// Attach the stage's execution log
    pub fn with_log(mut self, log: ExecutionLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Attach the run definition digest
    pub fn with_definition_hash(mut self, hash: impl Into<String>) -> Self {
        self.definition_hash = Some(hash.into());
        self
    }
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new run has started
    RunStarted,

    /// Every stage ran
    RunCompleted,

    /// The run stopped at a failing stage
    RunAborted,

    /// A stage is about to be invoked
    StageStarted,

    /// A stage reported status 0
    StageCompleted,

    /// A stage reported a non-zero status, faulted, or was skipped
    StageFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::new(
            Uuid::new_v4(),
            EventType::StageStarted,
            "Stage 'BIOS' started".to_string(),
        )
        .for_stage("BIOS", 0);

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type, EventType::StageStarted);
        assert_eq!(parsed.stage.as_deref(), Some("BIOS"));
        assert_eq!(parsed.stage_index, Some(0));
    }

    #[test]
    fn test_event_with_log() {
        let mut log = ExecutionLog::new("TestBuild", "TestBuild");
        log.fail(2, "make: *** [all] Error 2");

        let event = Event::new(Uuid::new_v4(), EventType::StageFailed, "failed".to_string())
            .for_stage("TestBuild", 3)
            .with_log(log);

        assert_eq!(event.log.as_ref().map(|l| l.status), Some(2));
    }

    #[test]
    fn test_event_type_names() {
        let json = serde_json::to_string(&EventType::RunAborted).unwrap();
        assert_eq!(json, "\"run_aborted\"");
    }
}
