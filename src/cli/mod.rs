//! Command-line interface for qualrun.
//!
//! Provides commands for running a pipeline from a run definition,
//! listing available plugins, and inspecting recorded runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use crate::adapters::{CommandExecutor, ModuleCmd, ShellExecutor};
use crate::config;
use crate::core::{
    hash_definition, ExecutionContext, PipelineRunner, PluginRegistry, PluginUnit, RunDefinition,
    RunJournal, RunnerOptions,
};
use crate::domain::RunRecord;
use crate::plugins;
use crate::report;

/// qualrun - Plugin-driven test pipeline runner
#[derive(Parser, Debug)]
#[command(name = "qualrun")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline described by a run definition
    Run {
        /// Run definition file (YAML)
        definition: PathBuf,

        /// Additional plugin directory to discover (repeatable)
        #[arg(long = "plugin-dir")]
        plugin_dirs: Vec<PathBuf>,

        /// Keep running stages after one fails
        #[arg(long)]
        continue_on_failure: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Do not record the run in the journal
        #[arg(long)]
        no_journal: bool,

        /// Print commands instead of running them
        #[arg(long)]
        dry_run: bool,

        /// Directory commands run in
        #[arg(long, env = "QUALRUN_SCRATCH_DIR")]
        scratch_dir: Option<PathBuf>,
    },

    /// List registered and discovered plugins
    Plugins {
        /// Additional plugin directory to discover (repeatable)
        #[arg(long = "plugin-dir")]
        plugin_dirs: Vec<PathBuf>,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                definition,
                plugin_dirs,
                continue_on_failure,
                json,
                no_journal,
                dry_run,
                scratch_dir,
            } => {
                let code = run_pipeline(RunArgs {
                    definition,
                    plugin_dirs,
                    continue_on_failure,
                    json,
                    no_journal,
                    dry_run,
                    scratch_dir,
                })
                .await?;
                if code != 0 {
                    std::process::exit(code);
                }
                Ok(())
            }
            Commands::Plugins { plugin_dirs } => list_plugins(&plugin_dirs),
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Config => show_config(),
        }
    }
}

struct RunArgs {
    definition: PathBuf,
    plugin_dirs: Vec<PathBuf>,
    continue_on_failure: bool,
    json: bool,
    no_journal: bool,
    dry_run: bool,
    scratch_dir: Option<PathBuf>,
}

/// Build a registry from the built-ins plus every configured and requested
/// plugin directory
fn load_registry(extra_dirs: &[PathBuf]) -> Result<PluginRegistry> {
    let cfg = config::config()?;
    let mut registry = plugins::default_registry()?;

    for dir in cfg.plugin_dirs.iter().chain(extra_dirs) {
        let count = registry
            .discover(dir)
            .with_context(|| format!("Plugin discovery failed in {}", dir.display()))?;
        info!(dir = %dir.display(), count, "Discovered plugins");
    }

    Ok(registry)
}

/// Run a pipeline and return the process exit code
async fn run_pipeline(args: RunArgs) -> Result<i32> {
    let cfg = config::config()?;

    let content = std::fs::read_to_string(&args.definition).with_context(|| {
        format!("Failed to read run definition: {}", args.definition.display())
    })?;
    let definition = RunDefinition::from_yaml(&content)
        .with_context(|| format!("Invalid run definition: {}", args.definition.display()))?;
    definition.validate()?;
    let store = definition.config_store()?;

    let mut registry = load_registry(&args.plugin_dirs)?;

    let run_id = Uuid::new_v4();
    let executor: Arc<dyn CommandExecutor> = if args.dry_run {
        Arc::new(ShellExecutor::dry_run())
    } else {
        Arc::new(ShellExecutor::new())
    };
    let modules = Arc::new(ModuleCmd::new(cfg.module_wrapper.as_deref(), executor.clone()));

    let mut ctx = ExecutionContext::new(run_id, store)
        .with_executor(executor)
        .with_modules(modules)
        .with_plugins(&registry);
    if let Some(dir) = args.scratch_dir {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create scratch directory: {}", dir.display()))?;
        ctx = ctx.with_scratch_dir(dir);
    }

    let mut runner = PipelineRunner::new(RunnerOptions {
        name: definition.name.clone(),
        continue_on_failure: definition.continue_on_failure || args.continue_on_failure,
        limits: definition.limits.clone().or(&cfg.limits),
        definition_hash: Some(hash_definition(&content)),
    });
    if !args.no_journal {
        runner = runner.with_journal(RunJournal::open(run_id).await?);
    }

    let report = runner.run(&registry, Arc::new(ctx)).await;
    registry.shutdown();

    if args.json {
        println!("{}", report::render_json(&report)?);
    } else {
        print!("{}", report::render_table(&report));
    }

    Ok(report.exit_code())
}

fn list_plugins(extra_dirs: &[PathBuf]) -> Result<()> {
    let mut registry = load_registry(extra_dirs)?;

    println!("Stages (execution order):");
    print_units(&registry.list_ordered());
    println!();
    println!("Tools:");
    print_units(&registry.tools());
    println!();
    println!("Utilities:");
    print_units(&registry.utilities());

    registry.shutdown();
    Ok(())
}

fn print_units(units: &[&PluginUnit]) {
    if units.is_empty() {
        println!("  (none)");
        return;
    }

    for unit in units {
        match unit.handle.ordering_key() {
            Some(key) => println!("  {:<20} [{}] {}", unit.name, key, unit.handle.display_name()),
            None => println!("  {:<20} {}", unit.name, unit.handle.display_name()),
        }
        for line in unit.handle.describe_options().describe() {
            println!("      {}", line);
        }
    }
}

async fn load_record(runs_dir: &Path, run_id: Uuid) -> Result<RunRecord> {
    if !runs_dir.join(run_id.to_string()).is_dir() {
        anyhow::bail!("No run found with ID {}", run_id);
    }

    let journal = RunJournal::open_in(runs_dir, run_id).await?;
    journal
        .record()
        .await?
        .with_context(|| format!("No events recorded for run {}", run_id))
}

async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let run = load_record(&config::runs_dir()?, run_id).await?;

    println!("Run ID: {}", run.id);
    println!("Name: {}", run.name);
    println!("State: {}", report::describe_state(&run.state));
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    println!("\nStage statuses:");
    for log in &run.logs {
        println!("  {}: {}", log.section, crate::domain::describe_status(log.status));
    }

    Ok(())
}

async fn list_runs(limit: usize) -> Result<()> {
    let runs_dir = config::runs_dir()?;

    let mut runs = Vec::new();
    for run_id in RunJournal::list_runs(&runs_dir).await? {
        if let Ok(run) = load_record(&runs_dir, run_id).await {
            runs.push(run);
        }
    }

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    println!("{:<38} {:<20} {:<15}", "RUN ID", "NAME", "STATE");
    println!("{}", "-".repeat(75));

    for run in runs.into_iter().take(limit) {
        println!(
            "{:<38} {:<20} {:<15}",
            run.id,
            run.name,
            report::describe_state(&run.state)
        );
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("qualrun configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home: {}", cfg.home.display());
    println!("  Runs: {}", cfg.home.join("runs").display());
    println!();
    println!("Plugin directories:");
    if cfg.plugin_dirs.is_empty() {
        println!("  (none)");
    } else {
        for dir in &cfg.plugin_dirs {
            println!("  {}", dir.display());
        }
    }
    println!();
    println!("Limits:");
    let show = |limit: Option<u64>| {
        limit
            .map(|s| format!("{}s", s))
            .unwrap_or_else(|| "unlimited".to_string())
    };
    println!("  Stage timeout: {}", show(cfg.limits.stage_timeout_seconds));
    println!("  Run timeout:   {}", show(cfg.limits.run_timeout_seconds));
    println!();
    println!(
        "Module wrapper: {}",
        cfg.module_wrapper.as_deref().unwrap_or("(none)")
    );

    Ok(())
}
