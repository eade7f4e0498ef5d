//! Environment module control.
//!
//! Loads and unloads environment modules (Lmod / Environment Modules) by
//! invoking a configured wrapper command, e.g. `modulecmd bash`. The wrapper
//! prints shell statements (`NAME=value; export NAME;`, `unset NAME;`) that
//! are parsed into [`EnvChange`]s for the caller to apply.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{CommandExecutor, CommandOutput, CommandRequest};

/// One environment edit requested by a module command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    Set { name: String, value: String },
    Unset(String),
}

/// Outcome of a module load or unload
#[derive(Debug, Clone, Default)]
pub struct ModuleOutput {
    /// Combined output of the wrapper invocations
    pub output: CommandOutput,

    /// Environment edits, in the order the wrapper emitted them
    pub changes: Vec<EnvChange>,
}

impl ModuleOutput {
    pub fn success(&self) -> bool {
        self.output.success()
    }
}

/// Controller for environment modules
#[async_trait]
pub trait ModuleController: Send + Sync {
    /// Load the given modules, stopping at the first failure
    async fn load(&self, modules: &[String]) -> Result<ModuleOutput>;

    /// Unload the given modules, stopping at the first failure
    async fn unload(&self, modules: &[String]) -> Result<ModuleOutput>;
}

/// Module controller backed by a wrapper command
pub struct ModuleCmd {
    /// Wrapper command line (e.g. "modulecmd bash"), if modules are available
    wrapper: Option<Vec<String>>,

    executor: Arc<dyn CommandExecutor>,
}

impl ModuleCmd {
    /// Create a controller. `None` disables module support.
    pub fn new(wrapper: Option<&str>, executor: Arc<dyn CommandExecutor>) -> Self {
        let wrapper = wrapper
            .map(|w| w.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|w| !w.is_empty());
        Self { wrapper, executor }
    }

    /// Whether a wrapper command is configured
    pub fn is_available(&self) -> bool {
        self.wrapper.is_some()
    }

    async fn run(&self, action: &str, modules: &[String]) -> Result<ModuleOutput> {
        let Some(ref wrapper) = self.wrapper else {
            return Ok(ModuleOutput {
                output: CommandOutput::failure(1, "Module capability was not found"),
                changes: Vec::new(),
            });
        };

        let mut combined = ModuleOutput::default();
        for module in modules.iter().map(|m| m.trim()).filter(|m| !m.is_empty()) {
            let mut argv = wrapper.clone();
            argv.push(action.to_string());
            argv.push(module.to_string());

            let request = CommandRequest::from_argv(&argv)
                .unwrap_or_else(|| CommandRequest::new(action, vec![module.to_string()]));
            let output = self.executor.execute(&request).await?;

            combined.output.stderr.push_str(&output.stderr);
            combined.output.elapsed += output.elapsed;
            if !output.success() {
                combined.output.status = output.status;
                combined.output.stdout.push_str(&output.stdout);
                combined.output.stderr.push_str(&format!(
                    "Attempt to {} environment module {} failed",
                    action, module
                ));
                return Ok(combined);
            }

            let changes = parse_env_changes(&output.stdout);
            debug!(action, module, changes = changes.len(), "Module command finished");
            combined.changes.extend(changes);
            combined.output.stdout.push_str(&output.stdout);
        }

        Ok(combined)
    }
}

#[async_trait]
impl ModuleController for ModuleCmd {
    async fn load(&self, modules: &[String]) -> Result<ModuleOutput> {
        self.run("load", modules).await
    }

    async fn unload(&self, modules: &[String]) -> Result<ModuleOutput> {
        self.run("unload", modules).await
    }
}

/// Parse the shell statements a module wrapper prints.
///
/// Understands `NAME=value`, `export NAME=value`, `export NAME` (no-op) and
/// `unset NAME...`, separated by `;` or newlines. Anything else is ignored.
pub fn parse_env_changes(script: &str) -> Vec<EnvChange> {
    let mut changes = Vec::new();

    for statement in split_statements(script) {
        let statement = statement.trim();
        if let Some(names) = statement.strip_prefix("unset ") {
            changes.extend(
                names
                    .split_whitespace()
                    .filter(|n| !n.starts_with('-'))
                    .map(|n| EnvChange::Unset(n.to_string())),
            );
            continue;
        }

        let assignment = statement.strip_prefix("export ").unwrap_or(statement).trim();
        let Some((name, value)) = assignment.split_once('=') else {
            continue;
        };
        if !is_identifier(name) {
            continue;
        }
        changes.push(EnvChange::Set {
            name: name.to_string(),
            value: unquote(value.trim()),
        });
    }

    changes
}

fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in script.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (None, ';' | '\n') => statements.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    statements.push(current);

    statements
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unquote(value: &str) -> String {
    for q in ['\'', '"'] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ShellExecutor;

    #[tokio::test]
    async fn test_missing_wrapper_reports_failure() {
        let modules = ModuleCmd::new(None, Arc::new(ShellExecutor::new()));
        assert!(!modules.is_available());

        let output = modules.load(&["gcc/12".to_string()]).await.unwrap();
        assert_eq!(output.output.status, 1);
        assert!(output.output.stderr.contains("not found"));
    }

    #[tokio::test]
    async fn test_wrapper_invoked_per_module() {
        // dry run echoes the command line instead of running it
        let modules = ModuleCmd::new(Some("modulecmd bash"), Arc::new(ShellExecutor::dry_run()));
        let output = modules
            .load(&["gcc/12".to_string(), "openmpi/5".to_string()])
            .await
            .unwrap();

        assert!(output.success());
        assert!(output.output.stdout.contains("modulecmd bash load gcc/12"));
        assert!(output.output.stdout.contains("modulecmd bash load openmpi/5"));
        assert!(output.changes.is_empty());
    }

    #[tokio::test]
    async fn test_failing_module_stops() {
        let modules = ModuleCmd::new(Some("false"), Arc::new(ShellExecutor::new()));
        let output = modules
            .unload(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_ne!(output.output.status, 0);
        assert!(output.output.stderr.contains("unload environment module a"));
    }

    #[test]
    fn test_parse_env_changes() {
        let script = "PATH='/opt/gcc/bin:/usr/bin' ;export PATH;\nCC=gcc; export CC;\nunset LD_PRELOAD OLD_CC;\nexport MPI_HOME=\"/opt/mpi;5\"";
        assert_eq!(
            parse_env_changes(script),
            vec![
                EnvChange::Set {
                    name: "PATH".into(),
                    value: "/opt/gcc/bin:/usr/bin".into()
                },
                EnvChange::Set {
                    name: "CC".into(),
                    value: "gcc".into()
                },
                EnvChange::Unset("LD_PRELOAD".into()),
                EnvChange::Unset("OLD_CC".into()),
                EnvChange::Set {
                    name: "MPI_HOME".into(),
                    value: "/opt/mpi;5".into()
                },
            ]
        );
    }

    #[test]
    fn test_parse_ignores_other_statements() {
        assert!(parse_env_changes("echo loaded; test -n x; 1A=b").is_empty());
    }

    #[tokio::test]
    async fn test_wrapper_output_becomes_changes() {
        let temp = tempfile::TempDir::new().unwrap();
        let script = temp.path().join("modulecmd.sh");
        std::fs::write(
            &script,
            "if [ \"$1\" = load ]; then echo \"MOD_HOME=/opt/$2; export MOD_HOME;\"; else echo 'unset MOD_HOME;'; fi\n",
        )
        .unwrap();
        let wrapper = format!("sh {}", script.display());
        let modules = ModuleCmd::new(Some(&wrapper), Arc::new(ShellExecutor::new()));

        let loaded = modules.load(&["gcc/12".to_string()]).await.unwrap();
        assert!(loaded.success());
        assert_eq!(
            loaded.changes,
            vec![EnvChange::Set {
                name: "MOD_HOME".into(),
                value: "/opt/gcc/12".into()
            }]
        );

        let unloaded = modules.unload(&["gcc/12".to_string()]).await.unwrap();
        assert_eq!(unloaded.changes, vec![EnvChange::Unset("MOD_HOME".into())]);
    }
}
