//! Shell snippet tool.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::adapters::CommandRequest;
use crate::core::{ExecutionContext, OptionSpec, Plugin, ResolvedOptions, Tool};
use crate::domain::ExecutionLog;

/// Tool running its `command` option through `sh -c`
#[derive(Debug, Clone, Default)]
pub struct ShellTool;

impl ShellTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Plugin for ShellTool {
    fn display_name(&self) -> String {
        "Shell".to_string()
    }

    fn describe_options(&self) -> OptionSpec {
        OptionSpec::new().with("command", "", "Shell command to run")
    }

    async fn execute(
        &self,
        log: &mut ExecutionLog,
        options: &ResolvedOptions,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        let Some(script) = options.get_nonempty("command") else {
            log.fail(1, "No command given");
            return Ok(());
        };

        let request = CommandRequest::shell(script)
            .with_env(ctx.environment())
            .with_cwd(ctx.scratch_dir().map(Path::to_path_buf));
        let output = ctx.executor().execute(&request).await?;

        log.status = output.status;
        log.stdout = output.stdout;
        log.stderr = output.stderr;
        Ok(())
    }
}

impl Tool for ShellTool {}
