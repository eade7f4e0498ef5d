//! Subprocess command executor.
//!
//! Spawns the requested program with piped output and waits for it with an
//! optional timeout. A command that outlives its timeout is killed.

use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::domain::TIMEOUT_STATUS;

use super::{CommandExecutor, CommandOutput, CommandRequest};

/// Executor running commands as local subprocesses
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    /// Print-only mode: commands are logged, not run
    dry_run: bool,
}

impl ShellExecutor {
    /// Create an executor that runs commands
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an executor that only reports what it would run
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }

    async fn run_subprocess(&self, request: &CommandRequest) -> Result<CommandOutput> {
        let started = Instant::now();

        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = request.cwd {
            command.current_dir(cwd);
        }

        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", request.display()))?;

        let waited = match request.timeout {
            Some(limit) => match timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    // the child is killed when its future is dropped
                    return Ok(CommandOutput {
                        status: TIMEOUT_STATUS,
                        stderr: format!(
                            "Command '{}' timed out after {:?}",
                            request.display(),
                            limit
                        ),
                        elapsed: started.elapsed(),
                        timed_out: true,
                        ..Default::default()
                    });
                }
            },
            None => child.wait_with_output().await,
        };

        let output =
            waited.with_context(|| format!("Failed to wait for '{}'", request.display()))?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: started.elapsed(),
            timed_out: false,
        })
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    async fn execute(&self, request: &CommandRequest) -> Result<CommandOutput> {
        if self.dry_run {
            debug!(command = %request.display(), "Dry run, not executing");
            return Ok(CommandOutput {
                stdout: request.display(),
                ..Default::default()
            });
        }

        let output = self.run_subprocess(request).await?;
        debug!(
            command = %request.display(),
            status = output.status,
            elapsed_ms = output.elapsed.as_millis() as u64,
            "Command finished"
        );
        Ok(output)
    }
}
