//! Run report rendering for the terminal.

use anyhow::{Context, Result};

use crate::core::RunReport;
use crate::domain::{describe_status, ExecutionLog, RunState};

/// Human-readable summary table
pub fn render_table(report: &RunReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("Run:    {} ({})\n", report.name, report.run_id));
    out.push_str(&format!("State:  {}\n\n", describe_state(&report.state)));

    out.push_str(&format!("{:<4} {:<24} {:<14} {:>10}\n", "#", "SECTION", "STATUS", "TIME"));
    out.push_str(&format!("{}\n", "-".repeat(55)));
    for (index, log) in report.logs.iter().enumerate() {
        out.push_str(&format!(
            "{:<4} {:<24} {:<14} {:>10}\n",
            index,
            log.section,
            describe_status(log.status),
            log.duration_ms
                .map(|ms| format!("{}ms", ms))
                .unwrap_or_else(|| "-".to_string())
        ));
    }

    if let Some(failure) = report.first_failure() {
        out.push('\n');
        out.push_str(&describe_failure(failure));
    }

    out
}

/// Report as pretty-printed JSON
pub fn render_json(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize run report")
}

pub fn describe_state(state: &RunState) -> String {
    match state {
        RunState::NotStarted => "not started".to_string(),
        RunState::Running { stage_index } => format!("running (stage {})", stage_index),
        RunState::Completed => "completed".to_string(),
        RunState::AbortedAt { stage_index, stage } => {
            format!("aborted at stage {} ({})", stage_index, stage)
        }
    }
}

fn describe_failure(log: &ExecutionLog) -> String {
    let mut out = if log.is_distinguished() {
        format!(
            "First failure: {} (status {}, {})\n",
            log.section,
            log.status,
            describe_status(log.status)
        )
    } else {
        format!("First failure: {} (status {})\n", log.section, log.status)
    };
    let stderr = log.stderr.trim();
    if !stderr.is_empty() {
        for line in stderr.lines() {
            out.push_str(&format!("  {}\n", line));
        }
    }
    out
}
