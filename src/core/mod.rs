//! Core orchestration logic.
//!
//! This module contains:
//! - Plugin: the plugin contract and role traits
//! - Registry: plugin registration, discovery and stage ordering
//! - Options: option declaration and resolution
//! - Runner: the pipeline execution engine
//! - Journal: append-only run event logging
//! - Harasser: background disruption workers

pub mod context;
pub mod definition;
pub mod discovery;
pub mod harasser;
pub mod journal;
pub mod limits;
pub mod options;
pub mod order;
pub mod plugin;
pub mod registry;
pub mod runner;

// Re-export commonly used types
pub use context::ExecutionContext;
pub use definition::{
    ConfigError, ConfigStore, RunDefinition, SectionQualifier, SectionTitle, SECTION_KEY,
};
pub use discovery::{DiscoveryError, PluginCatalog, PluginDefinition, PluginFactory};
pub use harasser::HarasserHandle;
pub use journal::{hash_definition, RunJournal};
pub use limits::{LimitViolation, RunLimits, RunTracker};
pub use options::{resolve, OptionDef, OptionSpec, ResolvedOptions};
pub use order::OrderIndex;
pub use plugin::{Plugin, PluginHandle, PluginUnit, Role, Stage, Tool, Utility};
pub use registry::PluginRegistry;
pub use runner::{PipelineRunner, RunReport, RunnerOptions};
