//! Manifest-driven command plugin.
//!
//! Runs the manifest's `command` line through the context's executor.
//! `{name}` placeholders in the arguments are replaced with option values,
//! and any modules named in the `modules` option are loaded first and
//! unloaded afterwards.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::adapters::CommandRequest;
use crate::core::{
    ExecutionContext, OptionSpec, Plugin, PluginDefinition, PluginHandle, ResolvedOptions, Role,
    Stage, Tool, Utility,
};
use crate::domain::ExecutionLog;

/// Option naming environment modules to load around the command
pub const MODULES_OPTION: &str = "modules";

/// Plugin running a fixed command line
#[derive(Debug, Clone)]
pub struct CommandPlugin {
    name: String,
    description: String,
    ordering: i64,
    command: Vec<String>,
    options: OptionSpec,
    timeout: Option<Duration>,
}

impl CommandPlugin {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            ordering: 0,
            command,
            options: OptionSpec::new(),
            timeout: None,
        }
    }

    pub fn with_ordering(mut self, ordering: i64) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_options(mut self, options: OptionSpec) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Catalog factory building a command plugin in any role
    pub fn build(role: Role, key: &str, definition: &PluginDefinition) -> Result<PluginHandle> {
        if definition.command.is_empty() {
            bail!("command plugin '{}' has an empty command", key);
        }

        let mut plugin = Self::new(key, definition.command.clone())
            .with_ordering(definition.ordering.unwrap_or_default())
            .with_options(definition.options.clone())
            .with_timeout(definition.timeout_seconds.map(Duration::from_secs));
        plugin.description = definition.description.clone();

        let plugin = Arc::new(plugin);
        Ok(match role {
            Role::Stage => PluginHandle::Stage(plugin),
            Role::Tool => PluginHandle::Tool(plugin),
            Role::Utility => PluginHandle::Utility(plugin),
        })
    }

    async fn run_command(
        &self,
        log: &mut ExecutionLog,
        options: &ResolvedOptions,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        let argv = self.expand(options);
        let request = CommandRequest::from_argv(&argv)
            .with_context(|| format!("'{}' has an empty command", self.name))?
            .with_env(ctx.environment())
            .with_cwd(ctx.scratch_dir().map(Path::to_path_buf));

        log.extra.insert("command".to_string(), request.display());
        let output = ctx.executor().execute(&request).await?;
        log.status = output.status;
        log.stdout = output.stdout;
        log.stderr = output.stderr;
        Ok(())
    }

    /// Command line with `{option}` placeholders filled in
    pub fn expand(&self, options: &ResolvedOptions) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| {
                options
                    .values()
                    .iter()
                    .chain(options.passthrough())
                    .fold(arg.clone(), |acc, (name, value)| {
                        acc.replace(&format!("{{{}}}", name), value)
                    })
            })
            .collect()
    }
}

#[async_trait]
impl Plugin for CommandPlugin {
    fn display_name(&self) -> String {
        if self.description.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.description)
        }
    }

    fn describe_options(&self) -> OptionSpec {
        if self.options.contains(MODULES_OPTION) {
            return self.options.clone();
        }
        self.options.clone().with(
            MODULES_OPTION,
            "",
            "Environment modules to load around the command",
        )
    }

    async fn execute(
        &self,
        log: &mut ExecutionLog,
        options: &ResolvedOptions,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        let modules = options.get_list(MODULES_OPTION);
        if modules.is_empty() {
            return self.run_command(log, options, ctx).await;
        }

        let loaded = ctx.modules().load(&modules).await?;
        ctx.apply_env(&loaded.changes);
        if !loaded.success() {
            log.fail(loaded.output.status, loaded.output.stderr);
            return Ok(());
        }

        let result = self.run_command(log, options, ctx).await;

        // unload even when the command could not be run
        match ctx.modules().unload(&modules).await {
            Ok(unloaded) => {
                ctx.apply_env(&unloaded.changes);
                if !unloaded.success() && log.is_success() {
                    log.fail(unloaded.output.status, unloaded.output.stderr);
                }
            }
            Err(e) if result.is_err() => {
                warn!(plugin = %self.name, error = %e, "Module unload failed");
            }
            Err(e) => return Err(e),
        }

        result
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Stage for CommandPlugin {
    fn ordering_key(&self) -> i64 {
        self.ordering
    }
}

impl Tool for CommandPlugin {}

impl Utility for CommandPlugin {}
