//! Pipeline Runner Integration Tests
//!
//! Ordering, abort and continue policies, fault capture, timeouts and
//! parent dependencies.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use uuid::Uuid;

use qualrun::core::{
    ConfigStore, ExecutionContext, OptionSpec, PipelineRunner, Plugin, PluginRegistry,
    ResolvedOptions, RunJournal, RunLimits, RunnerOptions, Stage, Tool,
};
use qualrun::domain::{
    EventType, ExecutionLog, RunState, FAULT_STATUS, SKIPPED_STATUS, TIMEOUT_STATUS,
};

#[derive(Clone, Copy)]
enum Behavior {
    Status(i32),
    Panic,
    Error,
    Sleep(Duration),
}

struct ScriptedStage {
    name: &'static str,
    key: i64,
    behavior: Behavior,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Plugin for ScriptedStage {
    fn display_name(&self) -> String {
        self.name.to_string()
    }

    fn describe_options(&self) -> OptionSpec {
        OptionSpec::new().with("level", "1", "Test level")
    }

    async fn execute(
        &self,
        log: &mut ExecutionLog,
        options: &ResolvedOptions,
        _ctx: &ExecutionContext,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(self.name.to_string());
        log.stdout = format!("level={}", options.get("level").unwrap_or_default());

        match self.behavior {
            Behavior::Status(status) => log.status = status,
            Behavior::Panic => panic!("stage {} exploded", self.name),
            Behavior::Error => anyhow::bail!("stage {} could not start", self.name),
            Behavior::Sleep(duration) => tokio::time::sleep(duration).await,
        }
        Ok(())
    }
}

impl Stage for ScriptedStage {
    fn ordering_key(&self) -> i64 {
        self.key
    }
}

impl Tool for ScriptedStage {}

struct Fixture {
    registry: PluginRegistry,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    fn new(stages: &[(&'static str, i64, Behavior)]) -> Self {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        for (name, key, behavior) in stages {
            registry
                .register_stage(
                    name,
                    Arc::new(ScriptedStage {
                        name: *name,
                        key: *key,
                        behavior: *behavior,
                        calls: calls.clone(),
                    }),
                )
                .unwrap();
        }
        Self { registry, calls }
    }

    fn with_tool(mut self, name: &'static str, behavior: Behavior) -> Self {
        self.registry
            .register_tool(
                name,
                Arc::new(ScriptedStage {
                    name,
                    key: 0,
                    behavior,
                    calls: self.calls.clone(),
                }),
            )
            .unwrap();
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn context(&self, config: ConfigStore) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::new(Uuid::new_v4(), config).with_plugins(&self.registry))
    }
}

fn runner(continue_on_failure: bool) -> PipelineRunner {
    PipelineRunner::new(RunnerOptions {
        name: "test".to_string(),
        continue_on_failure,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_abort_on_first_failure() {
    let fixture = Fixture::new(&[
        ("Late", 100, Behavior::Status(0)),
        ("Early", 0, Behavior::Status(0)),
        ("Middle", 50, Behavior::Status(1)),
    ]);

    let report = runner(false)
        .run(&fixture.registry, fixture.context(ConfigStore::new()))
        .await;

    assert_eq!(fixture.calls(), vec!["Early", "Middle"]);
    assert_eq!(report.logs.len(), 2);
    assert_eq!(report.logs[1].status, 1);
    assert_eq!(
        report.state,
        RunState::AbortedAt {
            stage_index: 1,
            stage: "Middle".to_string()
        }
    );
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_all_success_runs_in_order() {
    let fixture = Fixture::new(&[
        ("C", 30, Behavior::Status(0)),
        ("A", -10, Behavior::Status(0)),
        ("B", 20, Behavior::Status(0)),
    ]);

    let report = runner(false)
        .run(&fixture.registry, fixture.context(ConfigStore::new()))
        .await;

    assert_eq!(fixture.calls(), vec!["A", "B", "C"]);
    assert_eq!(report.logs.len(), 3);
    assert!(report.logs.iter().all(|l| l.is_success()));
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.exit_code(), 0);
    assert!(report.logs.iter().all(|l| l.duration_ms.is_some()));
}

#[tokio::test]
async fn test_empty_registry_completes() {
    let fixture = Fixture::new(&[]);
    let report = runner(false)
        .run(&fixture.registry, fixture.context(ConfigStore::new()))
        .await;

    assert!(report.logs.is_empty());
    assert_eq!(report.state, RunState::Completed);
}

#[tokio::test]
async fn test_panic_becomes_fault() {
    let fixture = Fixture::new(&[
        ("Boom", 0, Behavior::Panic),
        ("After", 10, Behavior::Status(0)),
    ]);

    let report = runner(false)
        .run(&fixture.registry, fixture.context(ConfigStore::new()))
        .await;

    assert_eq!(report.logs.len(), 1);
    assert_eq!(report.logs[0].status, FAULT_STATUS);
    assert!(report.logs[0].stderr.contains("exploded"));
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_error_becomes_fault_and_keeps_output() {
    let fixture = Fixture::new(&[("Broken", 0, Behavior::Error)]);

    let report = runner(false)
        .run(&fixture.registry, fixture.context(ConfigStore::new()))
        .await;

    assert_eq!(report.logs[0].status, FAULT_STATUS);
    assert!(report.logs[0].stderr.contains("could not start"));
    assert_eq!(report.logs[0].stdout, "level=1");
}

#[tokio::test]
async fn test_continue_mode_runs_everything() {
    let fixture = Fixture::new(&[
        ("A", 0, Behavior::Status(0)),
        ("B", 10, Behavior::Status(4)),
        ("C", 20, Behavior::Status(2)),
    ]);

    let report = runner(true)
        .run(&fixture.registry, fixture.context(ConfigStore::new()))
        .await;

    assert_eq!(fixture.calls(), vec!["A", "B", "C"]);
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.first_failure().map(|l| l.stage.as_str()), Some("B"));
    assert_eq!(report.exit_code(), 4);
}

#[tokio::test]
async fn test_failed_parent_skips_child() {
    let fixture = Fixture::new(&[
        ("Build", 0, Behavior::Status(2)),
        ("Test", 10, Behavior::Status(0)),
        ("Report", 20, Behavior::Status(0)),
    ]);
    let config = ConfigStore::new()
        .with_value("Test", "parent", "Build")
        .with_value("Report", "parent", "Fetch");

    let report = runner(true)
        .run(&fixture.registry, fixture.context(config))
        .await;

    assert_eq!(fixture.calls(), vec!["Build"]);
    assert_eq!(report.logs.len(), 3);
    assert_eq!(report.logs[1].status, 2);
    assert!(report.logs[1].stderr.contains("Build"));
    assert_eq!(report.logs[2].status, SKIPPED_STATUS);
}

#[tokio::test]
async fn test_stage_timeout() {
    let fixture = Fixture::new(&[
        ("Slow", 0, Behavior::Sleep(Duration::from_secs(30))),
        ("After", 10, Behavior::Status(0)),
    ]);
    let runner = PipelineRunner::new(RunnerOptions {
        name: "timeouts".to_string(),
        limits: RunLimits {
            stage_timeout_seconds: Some(1),
            run_timeout_seconds: None,
        },
        ..Default::default()
    });

    let report = runner
        .run(&fixture.registry, fixture.context(ConfigStore::new()))
        .await;

    assert_eq!(report.logs.len(), 1);
    assert_eq!(report.logs[0].status, TIMEOUT_STATUS);
    assert!(report.logs[0].stderr.contains("timed out"));
}

#[tokio::test]
async fn test_run_timeout_aborts_even_in_continue_mode() {
    let fixture = Fixture::new(&[
        ("Slow", 0, Behavior::Sleep(Duration::from_millis(1100))),
        ("Next", 10, Behavior::Status(0)),
        ("Last", 20, Behavior::Status(0)),
    ]);
    let runner = PipelineRunner::new(RunnerOptions {
        name: "run-limit".to_string(),
        continue_on_failure: true,
        limits: RunLimits {
            stage_timeout_seconds: None,
            run_timeout_seconds: Some(1),
        },
        ..Default::default()
    });

    let report = runner
        .run(&fixture.registry, fixture.context(ConfigStore::new()))
        .await;

    assert_eq!(fixture.calls(), vec!["Slow"]);
    assert_eq!(report.logs.len(), 2);
    assert!(report.logs[0].is_success());
    assert_eq!(report.logs[1].status, TIMEOUT_STATUS);
    assert!(matches!(report.state, RunState::AbortedAt { stage_index: 1, .. }));
}

#[tokio::test]
async fn test_overrides_and_passthrough() {
    let fixture = Fixture::new(&[("A", 0, Behavior::Status(0))]);
    let config = ConfigStore::new()
        .with_value("A", "level", "3")
        .with_value("A", "ticket", "QA-17")
        .with_value("Unused", "x", "y");

    let report = runner(false)
        .run(&fixture.registry, fixture.context(config))
        .await;

    assert_eq!(report.logs[0].stdout, "level=3");
    assert_eq!(
        report.logs[0].extra.get("ticket").map(String::as_str),
        Some("QA-17")
    );
}

#[tokio::test]
async fn test_journal_records_run() {
    let temp = TempDir::new().unwrap();
    let fixture = Fixture::new(&[
        ("A", 0, Behavior::Status(0)),
        ("B", 10, Behavior::Status(5)),
    ]);
    let ctx = fixture.context(ConfigStore::new());
    let run_id = ctx.run_id();

    let runner = PipelineRunner::new(RunnerOptions {
        name: "journaled".to_string(),
        definition_hash: Some("abc123".to_string()),
        ..Default::default()
    })
    .with_journal(RunJournal::open_in(temp.path(), run_id).await.unwrap());

    let report = runner.run(&fixture.registry, ctx).await;

    let journal = runner.journal().unwrap();
    let events = journal.replay().await.unwrap();
    let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            EventType::RunStarted,
            EventType::StageStarted,
            EventType::StageCompleted,
            EventType::StageStarted,
            EventType::StageFailed,
            EventType::RunAborted,
        ]
    );
    assert_eq!(events[0].definition_hash.as_deref(), Some("abc123"));

    let record = journal.record().await.unwrap().unwrap();
    assert_eq!(record.name, "journaled");
    assert_eq!(record.state, report.state);
    assert_eq!(record.logs, report.logs);
}

#[tokio::test]
async fn test_stage_runs_once_per_named_section() {
    let fixture = Fixture::new(&[
        ("Build", 0, Behavior::Status(0)),
        ("TestRun", 10, Behavior::Status(0)),
    ]);
    let config = ConfigStore::new()
        .with_value("TestRun:intel", "level", "3")
        .with_value("TestRun:ibm", "level", "2");

    let report = runner(false)
        .run(&fixture.registry, fixture.context(config))
        .await;

    assert_eq!(fixture.calls(), vec!["Build", "TestRun", "TestRun"]);
    let sections: Vec<&str> = report.logs.iter().map(|l| l.section.as_str()).collect();
    assert_eq!(sections, vec!["Build", "TestRun:intel", "TestRun:ibm"]);
    assert_eq!(report.logs[1].stage, "TestRun");
    assert_eq!(report.logs[1].stdout, "level=3");
    assert_eq!(report.logs[2].stdout, "level=2");
    assert_eq!(report.state, RunState::Completed);
}

#[tokio::test]
async fn test_skip_and_stop_sections() {
    let fixture = Fixture::new(&[
        ("Early", 0, Behavior::Status(0)),
        ("Middle", 50, Behavior::Status(0)),
        ("Late", 100, Behavior::Status(0)),
        ("Never", 200, Behavior::Status(0)),
    ]);
    let config = ConfigStore::new()
        .with_value("SKIP Middle", "level", "9")
        .with_value("Late:first", "level", "4")
        .with_value("STOP Late", "level", "0")
        .with_value("Late:second", "level", "5");

    let report = runner(false)
        .run(&fixture.registry, fixture.context(config))
        .await;

    assert_eq!(fixture.calls(), vec!["Early", "Late"]);
    let sections: Vec<&str> = report.logs.iter().map(|l| l.section.as_str()).collect();
    assert_eq!(sections, vec!["Early", "Late:first"]);
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_section_selects_plugin() {
    let fixture = Fixture::new(&[("Launch", 0, Behavior::Status(0))])
        .with_tool("Mpirun", Behavior::Status(0));
    let config = ConfigStore::new()
        .with_value("Launch:mpi", "plugin", "Mpirun")
        .with_value("Launch:mpi", "level", "7")
        .with_value("Launch:missing", "plugin", "Srun")
        .with_value("Launch:own", "plugin", "Launch");

    let report = runner(true)
        .run(&fixture.registry, fixture.context(config))
        .await;

    assert_eq!(fixture.calls(), vec!["Mpirun", "Launch"]);
    assert_eq!(report.logs.len(), 3);

    let mpi = &report.logs[0];
    assert_eq!((mpi.stage.as_str(), mpi.section.as_str()), ("Launch", "Launch:mpi"));
    assert_eq!(mpi.stdout, "level=7");
    assert_eq!(mpi.extra.get("plugin").map(String::as_str), Some("Mpirun"));

    let missing = &report.logs[1];
    assert_eq!(missing.status, 1);
    assert!(missing.stderr.contains("Srun"));

    assert!(report.logs[2].is_success());
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_parent_names_a_section() {
    let fixture = Fixture::new(&[
        ("Build", 0, Behavior::Status(3)),
        ("TestRun", 10, Behavior::Status(0)),
    ]);
    let config = ConfigStore::new()
        .with_value("Build:debug", "level", "1")
        .with_value("TestRun:debug", "parent", "Build:debug")
        .with_value("TestRun:release", "parent", "Build:release");

    let report = runner(true)
        .run(&fixture.registry, fixture.context(config))
        .await;

    assert_eq!(fixture.calls(), vec!["Build"]);
    assert_eq!(report.logs[1].section, "TestRun:debug");
    assert_eq!(report.logs[1].status, 3);
    assert_eq!(report.logs[2].status, SKIPPED_STATUS);
}
