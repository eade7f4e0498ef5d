//! qualrun - Plugin-driven test pipeline runner
//!
//! Runs an ordered pipeline of stages (fetch, build, flash, launch, ...)
//! assembled from plugins, and records every run in an append-only journal.
//!
//! # Architecture
//!
//! - Plugins play one of three roles: stages (ordered pipeline phases),
//!   tools (sub-tasks a stage invokes) and utilities (shared services)
//! - The registry collects plugins from compiled registrations and from
//!   YAML manifests discovered in plugin directories
//! - The runner executes stages in order, aborting on the first failure
//!   unless told to continue
//!
//! # Modules
//!
//! - `adapters`: Command execution and environment modules
//! - `core`: Registry, discovery, options, runner, journal, harasser
//! - `domain`: Data structures (ExecutionLog, Event, RunState)
//! - `plugins`: Built-in plugins
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a pipeline
//! qualrun run nightly.yaml --plugin-dir ./plugins
//!
//! # Check run status
//! qualrun status <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod plugins;
pub mod report;

// Re-export main types at crate root for convenience
pub use crate::core::{
    ExecutionContext, PipelineRunner, Plugin, PluginRegistry, Role, RunReport, Stage, Tool,
    Utility,
};
pub use domain::{Event, EventType, ExecutionLog, RunState};
