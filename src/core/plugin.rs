//! Plugin contract.
//!
//! A plugin implements [`Plugin`] plus exactly one role trait ([`Stage`],
//! [`Tool`] or [`Utility`]). The role is attached at registration time by
//! wrapping the instance in the matching [`PluginHandle`] variant.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::ExecutionLog;

use super::context::ExecutionContext;
use super::options::{OptionSpec, ResolvedOptions};

/// Capabilities every plugin exposes
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Human-readable name
    fn display_name(&self) -> String;

    /// Options this plugin understands, with defaults
    fn describe_options(&self) -> OptionSpec {
        OptionSpec::default()
    }

    /// Run the plugin, recording the outcome in `log`.
    ///
    /// A returned error is treated as a fault, not as a reported failure.
    async fn execute(
        &self,
        log: &mut ExecutionLog,
        options: &ResolvedOptions,
        ctx: &ExecutionContext,
    ) -> Result<()>;

    /// Called once when the plugin is registered
    fn activate(&self) -> Result<()> {
        Ok(())
    }

    /// Called once at teardown or when the plugin is replaced
    fn deactivate(&self) {}

    /// Time limit overriding the run-wide stage timeout
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// A pipeline phase with a fixed relative position
pub trait Stage: Plugin {
    /// Lower keys run earlier
    fn ordering_key(&self) -> i64;
}

/// A plugin a stage invokes to perform a sub-task
pub trait Tool: Plugin {}

/// A plugin offering a reusable cross-cutting service
pub trait Utility: Plugin {}

/// Role a plugin plays in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Stage,
    Tool,
    Utility,
}

impl Role {
    /// All roles, in marker precedence order
    pub const ALL: [Role; 3] = [Role::Stage, Role::Tool, Role::Utility];

    /// Name fragment identifying the role in a plugin file name
    pub fn marker(self) -> &'static str {
        match self {
            Self::Stage => "Stage",
            Self::Tool => "Tool",
            Self::Utility => "Utility",
        }
    }

    /// Role whose marker occurs in `name`, if any
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| name.contains(r.marker()))
    }

    /// Registry key for a name carrying this role's marker as a suffix
    pub fn canonical_key(self, name: &str) -> String {
        name.strip_suffix(self.marker()).unwrap_or(name).to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage => write!(f, "stage"),
            Self::Tool => write!(f, "tool"),
            Self::Utility => write!(f, "utility"),
        }
    }
}

/// A plugin instance tagged with its role
#[derive(Clone)]
pub enum PluginHandle {
    Stage(Arc<dyn Stage>),
    Tool(Arc<dyn Tool>),
    Utility(Arc<dyn Utility>),
}

impl PluginHandle {
    /// Role of the wrapped instance
    pub fn role(&self) -> Role {
        match self {
            Self::Stage(_) => Role::Stage,
            Self::Tool(_) => Role::Tool,
            Self::Utility(_) => Role::Utility,
        }
    }

    /// Ordering key (stages only)
    pub fn ordering_key(&self) -> Option<i64> {
        match self {
            Self::Stage(p) => Some(p.ordering_key()),
            _ => None,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::Stage(p) => p.display_name(),
            Self::Tool(p) => p.display_name(),
            Self::Utility(p) => p.display_name(),
        }
    }

    pub fn describe_options(&self) -> OptionSpec {
        match self {
            Self::Stage(p) => p.describe_options(),
            Self::Tool(p) => p.describe_options(),
            Self::Utility(p) => p.describe_options(),
        }
    }

    pub async fn execute(
        &self,
        log: &mut ExecutionLog,
        options: &ResolvedOptions,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        match self {
            Self::Stage(p) => p.execute(log, options, ctx).await,
            Self::Tool(p) => p.execute(log, options, ctx).await,
            Self::Utility(p) => p.execute(log, options, ctx).await,
        }
    }

    pub fn activate(&self) -> Result<()> {
        match self {
            Self::Stage(p) => p.activate(),
            Self::Tool(p) => p.activate(),
            Self::Utility(p) => p.activate(),
        }
    }

    pub fn deactivate(&self) {
        match self {
            Self::Stage(p) => p.deactivate(),
            Self::Tool(p) => p.deactivate(),
            Self::Utility(p) => p.deactivate(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Stage(p) => p.timeout(),
            Self::Tool(p) => p.timeout(),
            Self::Utility(p) => p.timeout(),
        }
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("role", &self.role())
            .field("name", &self.display_name())
            .finish()
    }
}

/// A registered plugin
#[derive(Debug, Clone)]
pub struct PluginUnit {
    /// Canonical key, unique within the role
    pub name: String,

    /// The instance, tagged with its role
    pub handle: PluginHandle,
}

impl PluginUnit {
    pub fn new(name: impl Into<String>, handle: PluginHandle) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }

    pub fn role(&self) -> Role {
        self.handle.role()
    }
}
