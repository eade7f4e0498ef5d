//! Shared services handed to every plugin invocation.
//!
//! The context is built once per run and shared by reference (behind an
//! `Arc`) with each stage task. It carries the configuration store, the
//! command executor, the module controller, an environment overlay that
//! utilities may extend, and the tools and utilities stages may invoke.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapters::{CommandExecutor, EnvChange, ModuleCmd, ModuleController, ShellExecutor};
use crate::domain::{ExecutionLog, FAULT_STATUS};

use super::definition::ConfigStore;
use super::options::resolve_for;
use super::plugin::{PluginHandle, Role};
use super::registry::PluginRegistry;

/// Services shared by all plugins in a run
pub struct ExecutionContext {
    run_id: Uuid,
    config: ConfigStore,
    executor: Arc<dyn CommandExecutor>,
    modules: Arc<dyn ModuleController>,
    env: Mutex<BTreeMap<String, String>>,
    scratch_dir: Option<PathBuf>,
    toolbox: BTreeMap<(Role, String), PluginHandle>,
}

impl ExecutionContext {
    /// Create a context running commands as local subprocesses, without
    /// module support
    pub fn new(run_id: Uuid, config: ConfigStore) -> Self {
        let executor: Arc<dyn CommandExecutor> = Arc::new(ShellExecutor::new());
        let modules = Arc::new(ModuleCmd::new(None, executor.clone()));
        Self {
            run_id,
            config,
            executor,
            modules,
            env: Mutex::new(BTreeMap::new()),
            scratch_dir: None,
            toolbox: BTreeMap::new(),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_modules(mut self, modules: Arc<dyn ModuleController>) -> Self {
        self.modules = modules;
        self
    }

    /// Directory commands run in
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Make the registry's tools and utilities invocable from stages
    pub fn with_plugins(mut self, registry: &PluginRegistry) -> Self {
        for unit in registry.tools().into_iter().chain(registry.utilities()) {
            self.toolbox
                .insert((unit.role(), unit.name.clone()), unit.handle.clone());
        }
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn executor(&self) -> &dyn CommandExecutor {
        self.executor.as_ref()
    }

    pub fn executor_arc(&self) -> Arc<dyn CommandExecutor> {
        self.executor.clone()
    }

    pub fn modules(&self) -> &dyn ModuleController {
        self.modules.as_ref()
    }

    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_deref()
    }

    /// Snapshot of the environment overlay
    pub fn environment(&self) -> BTreeMap<String, String> {
        self.env.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Add a variable to the environment overlay applied to every command
    pub fn set_env(&self, key: impl Into<String>, value: impl Into<String>) {
        self.env
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value.into());
    }

    /// Remove a variable from the environment overlay
    pub fn unset_env(&self, key: &str) {
        self.env.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
    }

    /// Apply edits emitted by a module load or unload
    pub fn apply_env(&self, changes: &[EnvChange]) {
        let mut env = self.env.lock().unwrap_or_else(|e| e.into_inner());
        for change in changes {
            match change {
                EnvChange::Set { name, value } => {
                    env.insert(name.clone(), value.clone());
                }
                EnvChange::Unset(name) => {
                    env.remove(name);
                }
            }
        }
    }

    /// Invoke a tool or utility by key.
    ///
    /// Options come from the configuration section named after the key,
    /// overlaid with `overrides`. Failures are reported in the returned log.
    pub async fn invoke(
        &self,
        role: Role,
        key: &str,
        overrides: &BTreeMap<String, String>,
    ) -> ExecutionLog {
        let mut log = ExecutionLog::new(key, key);

        let Some(handle) = self.toolbox.get(&(role, key.to_string())) else {
            warn!(%role, plugin = key, "Requested plugin is not registered");
            log.fail(1, format!("No {} named '{}' is registered", role, key));
            return log;
        };

        let mut merged = self.config.section(key).cloned().unwrap_or_default();
        merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        let options = resolve_for(key, &handle.describe_options(), &merged);
        log.extra.extend(options.passthrough().clone());

        debug!(%role, plugin = key, "Invoking plugin");
        if let Err(e) = handle.execute(&mut log, &options, self).await {
            log.fail(FAULT_STATUS, format!("{:#}", e));
        }
        log
    }
}
