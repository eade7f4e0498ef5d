//! Built-in plugins.
//!
//! - `command`: runs a configured command line (any role, manifest-driven)
//! - `Shell` tool: runs a shell snippet for a stage
//! - `Environ` utility: extends the environment overlay
//! - `Harasser` utility: starts and stops background disruption scripts

pub mod command;
pub mod environ;
pub mod harasser;
pub mod shell_tool;

use std::sync::Arc;

use anyhow::bail;

use crate::core::{DiscoveryError, PluginCatalog, PluginHandle, PluginRegistry, Role};

pub use command::CommandPlugin;
pub use environ::EnvironUtility;
pub use harasser::ScriptHarasser;
pub use shell_tool::ShellTool;

/// Catalog of implementations manifests may name
pub fn default_catalog() -> PluginCatalog {
    let mut catalog = PluginCatalog::new();

    catalog.register("command", CommandPlugin::build);
    catalog.register("shell", |role, key, _| match role {
        Role::Tool => Ok(PluginHandle::Tool(Arc::new(ShellTool::new()))),
        other => bail!("'{}' cannot be a {}: shell is a tool", key, other),
    });
    catalog.register("environ", |role, key, _| match role {
        Role::Utility => Ok(PluginHandle::Utility(Arc::new(EnvironUtility))),
        other => bail!("'{}' cannot be a {}: environ is a utility", key, other),
    });
    catalog.register("harasser", |role, key, _| match role {
        Role::Utility => Ok(PluginHandle::Utility(Arc::new(ScriptHarasser::new()))),
        other => bail!("'{}' cannot be a {}: harasser is a utility", key, other),
    });

    catalog
}

/// Registry with the default catalog and the built-in tools and utilities
pub fn default_registry() -> Result<PluginRegistry, DiscoveryError> {
    let mut registry = PluginRegistry::with_catalog(default_catalog());

    // Stable order keeps activation logs consistent.
    registry.register_tool("Shell", Arc::new(ShellTool::new()))?;
    registry.register_utility("Environ", Arc::new(EnvironUtility))?;
    registry.register_utility("Harasser", Arc::new(ScriptHarasser::new()))?;

    Ok(registry)
}
