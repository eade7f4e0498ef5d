//! Domain types for the qualrun orchestrator.
//!
//! This module contains the core data structures:
//! - ExecutionLog: per-invocation result records
//! - Events: immutable records of run state changes
//! - Run: run state and reconstruction from the journal

pub mod events;
pub mod log;
pub mod run;

// Re-export commonly used types
pub use events::{Event, EventType};
pub use log::{
    describe_status, ExecutionLog, FAULT_STATUS, SKIPPED_STATUS, SUCCESS_STATUS, TIMEOUT_STATUS,
};
pub use run::{RunRecord, RunState};
