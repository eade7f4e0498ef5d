//! Pipeline runner.
//!
//! Walks the registry's stages in order, resolves each stage's options from
//! the configuration sections addressed to it, and invokes it on its own
//! task. A non-zero status aborts the run unless `continue_on_failure` is
//! set. Panics, errors and timeouts inside a stage are converted into its
//! log; the runner itself never fails.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinError;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    describe_status, Event, EventType, ExecutionLog, RunState, FAULT_STATUS, SKIPPED_STATUS,
    TIMEOUT_STATUS,
};

use super::context::ExecutionContext;
use super::definition::{ConfigStore, SectionQualifier, SectionTitle};
use super::journal::RunJournal;
use super::limits::{LimitViolation, RunLimits, RunTracker};
use super::options::resolve_for;
use super::plugin::{PluginHandle, PluginUnit, Role};
use super::registry::PluginRegistry;

/// Policy for a run
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Name recorded in the report and journal
    pub name: String,

    /// Keep running stages after one fails
    pub continue_on_failure: bool,

    /// Time limits
    pub limits: RunLimits,

    /// Digest of the run definition, recorded at run start
    pub definition_hash: Option<String>,
}

/// Outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub name: String,
    pub state: RunState,

    /// Logs of every visited stage, in execution order
    pub logs: Vec<ExecutionLog>,
}

impl RunReport {
    /// First log with a non-zero status
    pub fn first_failure(&self) -> Option<&ExecutionLog> {
        self.logs.iter().find(|l| !l.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.first_failure().is_none()
    }

    /// Process exit code for this run.
    ///
    /// 0 when every stage succeeded, otherwise the first failing status
    /// when it fits in 1..=255, else 1.
    pub fn exit_code(&self) -> i32 {
        match self.first_failure() {
            None => 0,
            Some(log) if (1..=255).contains(&log.status) => log.status,
            Some(_) => 1,
        }
    }
}

/// Executes registered stages in order
pub struct PipelineRunner {
    options: RunnerOptions,
    journal: Option<RunJournal>,
}

impl PipelineRunner {
    pub fn new(options: RunnerOptions) -> Self {
        Self {
            options,
            journal: None,
        }
    }

    /// Record run events in `journal`
    pub fn with_journal(mut self, journal: RunJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn journal(&self) -> Option<&RunJournal> {
        self.journal.as_ref()
    }

    /// Run every stage of `registry` in order.
    ///
    /// A stage runs once per configuration section addressed to its key
    /// (`<key>` or `<key>:<name>`), or once with its defaults when no
    /// section names it.
    #[instrument(skip_all, fields(run = %self.options.name, run_id = %ctx.run_id()))]
    pub async fn run(&self, registry: &PluginRegistry, ctx: Arc<ExecutionContext>) -> RunReport {
        let run_id = ctx.run_id();
        let stages = registry.list_ordered();
        info!(stages = stages.len(), "Starting pipeline");

        self.warn_unmatched_sections(registry, &ctx);

        let mut start_event = Event::new(run_id, EventType::RunStarted, self.options.name.clone());
        if let Some(ref hash) = self.options.definition_hash {
            start_event = start_event.with_definition_hash(hash.clone());
        }
        self.record(start_event).await;

        let mut state = RunState::NotStarted;
        let mut tracker = RunTracker::new();
        let mut logs: Vec<ExecutionLog> = Vec::with_capacity(stages.len());
        let mut stopped_at: Option<String> = None;

        'stages: for (index, unit) in stages.into_iter().enumerate() {
            state.advance(RunState::Running { stage_index: index });

            for (title, parsed, section) in invocations(unit, ctx.config()) {
                match parsed.qualifier {
                    Some(SectionQualifier::Skip) => {
                        debug!(section = %title, "Skipping section");
                        continue;
                    }
                    Some(SectionQualifier::Stop) => {
                        info!(section = %title, "Stop section reached");
                        stopped_at = Some(title);
                        break 'stages;
                    }
                    None => {}
                }

                self.record(
                    Event::new(run_id, EventType::StageStarted, format!("Section '{}' started", title))
                        .for_stage(&unit.name, index),
                )
                .await;

                let (log, run_expired) = match self.options.limits.check(&tracker) {
                    Err(violation) => {
                        error!(section = %title, %violation, "Run limit exceeded");
                        let mut log = ExecutionLog::new(&unit.name, &title);
                        log.fail(TIMEOUT_STATUS, violation.to_string());
                        (log, true)
                    }
                    Ok(()) => match parent_failure(&unit.name, &title, &section, &logs) {
                        Some(log) => (log, false),
                        None => {
                            tracker.record_stage();
                            (self.invoke(registry, unit, &title, &section, &ctx).await, false)
                        }
                    },
                };

                let (event_type, summary) = if log.is_success() {
                    info!(section = %title, index, duration_ms = ?log.duration_ms, "Stage completed");
                    (EventType::StageCompleted, format!("Section '{}' completed", title))
                } else {
                    warn!(section = %title, index, status = log.status, stderr = %log.stderr, "Stage failed");
                    (
                        EventType::StageFailed,
                        format!("Section '{}' {}", title, describe_status(log.status)),
                    )
                };
                self.record(
                    Event::new(run_id, event_type, summary)
                        .for_stage(&unit.name, index)
                        .with_log(log.clone()),
                )
                .await;

                let failed = !log.is_success();
                logs.push(log);

                if run_expired || (failed && !self.options.continue_on_failure) {
                    state.advance(RunState::AbortedAt {
                        stage_index: index,
                        stage: title,
                    });
                    break 'stages;
                }
            }
        }

        state.advance(RunState::Completed);

        match state {
            RunState::AbortedAt {
                stage_index,
                ref stage,
            } => {
                error!(stage = %stage, stage_index, "Pipeline aborted");
                self.record(
                    Event::new(run_id, EventType::RunAborted, format!("Run aborted at '{}'", stage))
                        .for_stage(stage, stage_index),
                )
                .await;
            }
            _ => {
                let summary = match stopped_at {
                    Some(ref title) => format!("Run stopped at section '{}'", title),
                    None => "Run completed".to_string(),
                };
                info!(logs = logs.len(), invoked = tracker.stages_executed, "Pipeline completed");
                self.record(Event::new(run_id, EventType::RunCompleted, summary))
                    .await;
            }
        }

        RunReport {
            run_id,
            name: self.options.name.clone(),
            state,
            logs,
        }
    }

    /// Invoke the plugin a section selects for a stage slot
    async fn invoke(
        &self,
        registry: &PluginRegistry,
        unit: &PluginUnit,
        title: &str,
        section: &BTreeMap<String, String>,
        ctx: &Arc<ExecutionContext>,
    ) -> ExecutionLog {
        let selected = section
            .get("plugin")
            .map(|p| p.trim())
            .filter(|p| !p.is_empty() && *p != unit.name);

        let Some(plugin) = selected else {
            return self.execute_stage(&unit.name, &unit.handle, title, section, ctx).await;
        };

        let found = registry
            .lookup(Role::Tool, plugin)
            .or_else(|| registry.lookup(Role::Utility, plugin));
        match found {
            Some(chosen) => {
                debug!(section = %title, plugin, role = %chosen.role(), "Section selects plugin");
                let log = self
                    .execute_stage(&unit.name, &chosen.handle, title, section, ctx)
                    .await;
                log.with_extra("plugin", plugin)
            }
            None => {
                let mut log = ExecutionLog::new(&unit.name, title).with_extra("plugin", plugin);
                log.fail(
                    1,
                    format!(
                        "Plugin '{}' is not registered as stage '{}', a tool or a utility",
                        plugin, unit.name
                    ),
                );
                log
            }
        }
    }

    /// Invoke one plugin on its own task, converting panics, errors and
    /// timeouts into its log
    async fn execute_stage(
        &self,
        stage: &str,
        handle: &PluginHandle,
        title: &str,
        section: &BTreeMap<String, String>,
        ctx: &Arc<ExecutionContext>,
    ) -> ExecutionLog {
        let options = resolve_for(title, &handle.describe_options(), section);

        let mut template = ExecutionLog::new(stage, title);
        template.extra.extend(options.passthrough().clone());
        template.started_at = Some(Utc::now());
        let started = Instant::now();

        debug!(section = %title, options = ?options.values(), "Invoking stage");

        let task_handle = handle.clone();
        let task_ctx = ctx.clone();
        let mut log = template.clone();
        let task = tokio::spawn(async move {
            let result = task_handle.execute(&mut log, &options, &task_ctx).await;
            (log, result)
        });
        let abort = task.abort_handle();

        let joined = match self.options.limits.stage_timeout(handle.timeout()) {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    abort.abort();
                    let violation = LimitViolation::StageTimeout {
                        stage: title.to_string(),
                        limit,
                    };
                    template.fail(TIMEOUT_STATUS, violation.to_string());
                    None
                }
            },
            None => Some(task.await),
        };

        let mut log = match joined {
            Some(Ok((log, Ok(())))) => log,
            Some(Ok((mut log, Err(e)))) => {
                log.fail(FAULT_STATUS, format!("Stage returned an error: {:#}", e));
                log
            }
            Some(Err(join_error)) => {
                template.fail(FAULT_STATUS, join_failure(join_error));
                template
            }
            None => template,
        };

        log.finished_at = Some(Utc::now());
        log.duration_ms = Some(started.elapsed().as_millis() as u64);
        log
    }

    fn warn_unmatched_sections(&self, registry: &PluginRegistry, ctx: &ExecutionContext) {
        for (title, _) in ctx.config().iter() {
            let parsed = SectionTitle::parse(title);
            if !registry.contains_key(&parsed.stage) {
                warn!(section = %title, "Configuration section matches no registered plugin");
            }
        }
    }

    async fn record(&self, event: Event) {
        if let Some(ref journal) = self.journal {
            if let Err(e) = journal.append(&event).await {
                warn!(error = %e, "Failed to append to run journal");
            }
        }
    }
}

/// Sections a stage runs for: those addressed to its key, or an implicit
/// one titled after the key with no overrides
fn invocations(
    unit: &PluginUnit,
    config: &ConfigStore,
) -> Vec<(String, SectionTitle, BTreeMap<String, String>)> {
    let matching: Vec<_> = config
        .sections_for(&unit.name)
        .into_iter()
        .map(|(title, parsed, values)| (title.to_string(), parsed, values.clone()))
        .collect();
    if !matching.is_empty() {
        return matching;
    }

    vec![(
        unit.name.clone(),
        SectionTitle::parse(&unit.name),
        BTreeMap::new(),
    )]
}

/// Log for a section whose declared parent is missing or failed.
///
/// The parent names a section title or a stage key; a stage key covers
/// every section that ran for it.
fn parent_failure(
    stage: &str,
    title: &str,
    section: &BTreeMap<String, String>,
    logs: &[ExecutionLog],
) -> Option<ExecutionLog> {
    let parent = section.get("parent").map(|p| p.trim()).filter(|p| !p.is_empty())?;
    let mut log = ExecutionLog::new(stage, title);

    let mut related: Vec<&ExecutionLog> = logs.iter().filter(|l| l.section == parent).collect();
    if related.is_empty() {
        related = logs.iter().filter(|l| l.stage == parent).collect();
    }

    if related.is_empty() {
        log.fail(
            SKIPPED_STATUS,
            format!("Parent stage '{}' did not run", parent),
        );
        return Some(log);
    }

    let failed = related.into_iter().find(|l| !l.is_success())?;
    log.fail(
        failed.status,
        format!(
            "Parent stage '{}' failed: {}",
            parent,
            describe_status(failed.status)
        ),
    );
    Some(log)
}

/// Explanation for a stage task that did not return
fn join_failure(error: JoinError) -> String {
    if error.is_panic() {
        format!("Stage panicked: {}", panic_message(error.into_panic()))
    } else {
        "Stage task was cancelled before it finished".to_string()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
