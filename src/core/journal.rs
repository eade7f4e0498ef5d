//! Append-only run journal with file-based persistence.
//!
//! Each run gets `<runs_dir>/<run-id>/events.jsonl`, one JSON event per
//! line. The journal is written by the runner and replayed by the
//! `status` and `runs` commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Event, RunRecord};

/// File-based run journal using JSONL format
pub struct RunJournal {
    /// Directory containing the run
    run_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,

    /// Serializes appends
    write_lock: Mutex<()>,
}

impl RunJournal {
    /// Create or open the journal for a run under the configured runs directory
    pub async fn open(run_id: Uuid) -> Result<Self> {
        let base_dir = crate::config::runs_dir()?;
        Self::open_in(&base_dir, run_id).await
    }

    /// Create or open the journal for a run under `base_dir`
    pub async fn open_in(base_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = base_dir.join(run_id.to_string());

        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        let events_path = run_dir.join("events.jsonl");

        Ok(Self {
            run_dir,
            events_path,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Get the run directory
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Append an event to the journal
    pub async fn append(&self, event: &Event) -> Result<()> {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open events file: {}",
                    self.events_path.display()
                )
            })?;

        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Reconstruct the run from its events
    pub async fn record(&self) -> Result<Option<RunRecord>> {
        let events = self.replay().await?;
        Ok(RunRecord::from_events(&events))
    }

    /// List all run IDs in `base_dir`
    pub async fn list_runs(base_dir: &Path) -> Result<Vec<Uuid>> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }
}

/// Digest of a run definition (first 16 hex chars of SHA256)
pub fn hash_definition(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    result[..8].iter().map(|b| format!("{:02x}", b)).collect()
}
