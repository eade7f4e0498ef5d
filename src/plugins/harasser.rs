//! Scripted harasser utility.
//!
//! Launches trigger scripts as background workers while stages run, and
//! tears them down with their paired stop scripts. Driven by the `action`
//! option:
//!
//! - `start`: launch one worker per `trigger_scripts` entry
//! - `check`: fail if any worker exited with a non-zero status
//! - `stop`: run each worker's stop script, then join it

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::adapters::{CommandExecutor, CommandRequest};
use crate::core::harasser::{self, HarasserHandle};
use crate::core::{ExecutionContext, OptionSpec, Plugin, ResolvedOptions, Utility};
use crate::domain::{ExecutionLog, FAULT_STATUS};

struct Worker {
    handle: HarasserHandle,
    stop_script: String,
}

/// Utility managing scripted background harassers
#[derive(Default)]
pub struct ScriptHarasser {
    workers: Mutex<Vec<Worker>>,
}

impl ScriptHarasser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of workers started and not yet stopped
    pub fn running(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Worker>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_workers(&self) -> Vec<Worker> {
        std::mem::take(&mut *self.lock())
    }

    fn start(&self, log: &mut ExecutionLog, options: &ResolvedOptions, ctx: &ExecutionContext) {
        let triggers = options.get_list("trigger_scripts");
        let stops = options.get_list("stop_scripts");
        if triggers.len() != stops.len() {
            warn!(
                triggers = triggers.len(),
                stops = stops.len(),
                "Unpaired harasser scripts are ignored"
            );
        }

        let mut ids = Vec::new();
        for (trigger, stop_script) in triggers.into_iter().zip(stops) {
            let argv: Vec<String> = trigger.split_whitespace().map(str::to_string).collect();
            let Some(request) = CommandRequest::from_argv(&argv) else {
                continue;
            };
            let request = request
                .with_env(ctx.environment())
                .with_cwd(ctx.scratch_dir().map(|p| p.to_path_buf()));
            let executor = ctx.executor_arc();

            let handle = harasser::start(move |_| run_script(executor, request), argv);
            ids.push(handle.id().to_string());
            self.lock().push(Worker {
                handle,
                stop_script,
            });
        }

        info!(started = ids.len(), "Harassers started");
        log.stdout = format!("Started {} harasser(s)", ids.len());
        log.extra.insert("harassers".to_string(), ids.join(","));
        log.status = 0;
    }

    async fn check(&self, log: &mut ExecutionLog, options: &ResolvedOptions, ctx: &ExecutionContext) {
        let (finished, alive): (Vec<Worker>, Vec<Worker>) = self
            .take_workers()
            .into_iter()
            .partition(|w| !w.handle.is_alive());

        let mut dead = Vec::new();
        for worker in finished {
            let id = worker.handle.id();
            let status = worker.handle.stop().await;
            if status != 0 {
                dead.push(format!("harasser {} exited with status {}", id, status));
            }
        }

        self.lock().extend(alive);

        if dead.is_empty() {
            log.stdout = format!("{} harasser(s) running", self.running());
            log.status = 0;
            return;
        }

        // a dead harasser invalidates the others too
        self.stop(log, options, ctx).await;
        log.fail(1, dead.join("\n"));
    }

    async fn stop(&self, log: &mut ExecutionLog, options: &ResolvedOptions, ctx: &ExecutionContext) {
        let join_timeout = options
            .get_int("join_timeout")
            .filter(|secs| *secs >= 0)
            .map(|secs| Duration::from_secs(secs as u64));

        let mut failures = Vec::new();
        let mut stopped = 0;
        for worker in self.take_workers() {
            let argv: Vec<String> = worker
                .stop_script
                .split_whitespace()
                .map(str::to_string)
                .collect();
            let stop_status = match CommandRequest::from_argv(&argv) {
                Some(request) => {
                    let request = request.with_env(ctx.environment());
                    run_script(ctx.executor_arc(), request).await
                }
                None => 0,
            };

            let id = worker.handle.id();
            let uptime_ms = worker.handle.elapsed().as_millis() as u64;
            if stop_status == 0 {
                let status = match join_timeout {
                    Some(limit) => worker.handle.stop_within(limit).await,
                    None => worker.handle.stop().await,
                };
                info!(harasser = id, status, uptime_ms, "Harasser stopped");
            } else {
                warn!(harasser = id, stop_status, uptime_ms, "Stop script failed, aborting harasser");
                worker.handle.abort();
                failures.push(format!(
                    "stop script '{}' for harasser {} exited with status {}",
                    worker.stop_script, id, stop_status
                ));
            }
            stopped += 1;
        }

        log.stdout = format!("Stopped {} harasser(s)", stopped);
        if failures.is_empty() {
            log.status = 0;
        } else {
            log.fail(1, failures.join("\n"));
        }
    }
}

async fn run_script(executor: Arc<dyn CommandExecutor>, request: CommandRequest) -> i32 {
    match executor.execute(&request).await {
        Ok(output) => output.status,
        Err(e) => {
            warn!(command = %request.display(), error = %e, "Harasser script could not run");
            FAULT_STATUS
        }
    }
}

#[async_trait]
impl Plugin for ScriptHarasser {
    fn display_name(&self) -> String {
        "Harasser".to_string()
    }

    fn describe_options(&self) -> OptionSpec {
        OptionSpec::new()
            .with("action", "start", "One of start, check or stop")
            .with("trigger_scripts", "", "Scripts to run to launch harassers")
            .with("stop_scripts", "", "Scripts to run to stop and clean up harassers")
            .with("join_timeout", "", "Seconds to wait for harassers to finish")
    }

    async fn execute(
        &self,
        log: &mut ExecutionLog,
        options: &ResolvedOptions,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        match options.get("action").unwrap_or("start").trim() {
            "start" => self.start(log, options, ctx),
            "check" => self.check(log, options, ctx).await,
            "stop" => self.stop(log, options, ctx).await,
            other => bail!("unknown harasser action '{}'", other),
        }
        Ok(())
    }

    fn deactivate(&self) {
        let workers = self.take_workers();
        if !workers.is_empty() {
            warn!(count = workers.len(), "Harasser deactivated with workers running, aborting them");
        }
        for worker in workers {
            worker.handle.abort();
        }
    }
}

impl Utility for ScriptHarasser {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ConfigStore, PluginRegistry, Role};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn setup() -> (Arc<ScriptHarasser>, ExecutionContext) {
        let harasser = Arc::new(ScriptHarasser::new());
        let mut registry = PluginRegistry::new();
        registry.register_utility("Harasser", harasser.clone()).unwrap();
        let ctx = ExecutionContext::new(Uuid::new_v4(), ConfigStore::new()).with_plugins(&registry);
        (harasser, ctx)
    }

    #[tokio::test]
    async fn test_start_check_stop() {
        let (harasser, ctx) = setup();

        let log = ctx
            .invoke(
                Role::Utility,
                "Harasser",
                &overrides(&[
                    ("action", "start"),
                    ("trigger_scripts", "sleep 0.2, sleep 0.2"),
                    ("stop_scripts", "true, true"),
                ]),
            )
            .await;
        assert!(log.is_success());
        assert_eq!(harasser.running(), 2);

        let log = ctx
            .invoke(Role::Utility, "Harasser", &overrides(&[("action", "check")]))
            .await;
        assert!(log.is_success(), "{}", log.stderr);

        let log = ctx
            .invoke(
                Role::Utility,
                "Harasser",
                &overrides(&[("action", "stop"), ("join_timeout", "5")]),
            )
            .await;
        assert!(log.is_success(), "{}", log.stderr);
        assert_eq!(harasser.running(), 0);
    }

    #[tokio::test]
    async fn test_check_reports_dead_harasser() {
        let (harasser, ctx) = setup();

        ctx.invoke(
            Role::Utility,
            "Harasser",
            &overrides(&[("trigger_scripts", "false"), ("stop_scripts", "true")]),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let log = ctx
            .invoke(Role::Utility, "Harasser", &overrides(&[("action", "check")]))
            .await;
        assert_eq!(log.status, 1);
        assert!(log.stderr.contains("exited with status"));
        assert_eq!(harasser.running(), 0);
    }

    #[tokio::test]
    async fn test_deactivate_aborts_workers() {
        let (harasser, ctx) = setup();

        ctx.invoke(
            Role::Utility,
            "Harasser",
            &overrides(&[("trigger_scripts", "sleep 30"), ("stop_scripts", "true")]),
        )
        .await;
        assert_eq!(harasser.running(), 1);

        harasser.deactivate();
        assert_eq!(harasser.running(), 0);
    }

    #[tokio::test]
    async fn test_unknown_action_is_fault() {
        let (_harasser, ctx) = setup();
        let log = ctx
            .invoke(Role::Utility, "Harasser", &overrides(&[("action", "pause")]))
            .await;
        assert_eq!(log.status, FAULT_STATUS);
    }
}
