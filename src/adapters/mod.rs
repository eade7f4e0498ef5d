//! Adapter interfaces for external systems.
//!
//! Plugins never spawn processes themselves; they go through the command
//! executor and module controller carried by the execution context.

pub mod modules;
pub mod shell;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use modules::{EnvChange, ModuleCmd, ModuleController, ModuleOutput};
pub use shell::ShellExecutor;

/// A command to run
#[derive(Debug, Clone, Default)]
pub struct CommandRequest {
    /// Program to execute
    pub program: String,

    /// Arguments passed to the program
    pub args: Vec<String>,

    /// Environment variables added on top of the inherited environment
    pub env: BTreeMap<String, String>,

    /// Working directory
    pub cwd: Option<PathBuf>,

    /// Kill the command after this long
    pub timeout: Option<Duration>,
}

impl CommandRequest {
    /// Create a request for `program` with `args`
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            ..Default::default()
        }
    }

    /// Split an argv vector into program and arguments
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    /// Run `script` through `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh", vec!["-c".to_string(), script.into()])
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command line as a single display string
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit status (non-zero on failure)
    pub status: i32,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Wall-clock time the command took
    pub elapsed: Duration,

    /// Whether the command was killed for exceeding its timeout
    pub timed_out: bool,
}

impl CommandOutput {
    /// An output that reports failure without running anything
    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Trait for command execution backends
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Human-readable executor name
    fn name(&self) -> &str;

    /// Run a command to completion.
    ///
    /// A command that runs and exits non-zero is an `Ok` output; `Err` means
    /// the command could not be run at all.
    async fn execute(&self, request: &CommandRequest) -> Result<CommandOutput>;
}
