//! Background disruption workers.
//!
//! A harasser is a task that runs alongside the pipeline to stress the
//! system under test. [`start`] spawns it on the Tokio runtime and returns
//! a [`HarasserHandle`] that owns the worker exclusively. Dropping the
//! handle aborts a worker that is still running.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::{FAULT_STATUS, TIMEOUT_STATUS};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Owned handle to a running background worker
#[derive(Debug)]
pub struct HarasserHandle {
    id: u64,
    args: Vec<String>,
    started: Instant,
    join: JoinHandle<i32>,
}

/// Spawn `task(args)` as a background worker.
///
/// The worker's return value is its exit status.
pub fn start<F, Fut>(task: F, args: Vec<String>) -> HarasserHandle
where
    F: FnOnce(Vec<String>) -> Fut,
    Fut: Future<Output = i32> + Send + 'static,
{
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    debug!(harasser = id, args = ?args, "Starting harasser");

    let join = tokio::spawn(task(args.clone()));

    HarasserHandle {
        id,
        args,
        started: Instant::now(),
        join,
    }
}

impl HarasserHandle {
    /// Process-unique worker id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Arguments the worker was started with
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Whether the worker is still running
    pub fn is_alive(&self) -> bool {
        !self.join.is_finished()
    }

    /// Time since the worker was started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Wait for the worker to finish and return its exit status.
    ///
    /// A worker that panicked or was aborted reports `FAULT_STATUS`.
    pub async fn stop(mut self) -> i32 {
        let id = self.id;
        match (&mut self.join).await {
            Ok(status) => status,
            Err(e) => {
                warn!(harasser = id, error = %e, "Harasser did not finish cleanly");
                FAULT_STATUS
            }
        }
    }

    /// Like [`stop`](Self::stop), but abort the worker if it has not
    /// finished within `limit`, reporting `TIMEOUT_STATUS`.
    pub async fn stop_within(mut self, limit: Duration) -> i32 {
        match tokio::time::timeout(limit, &mut self.join).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!(harasser = self.id, error = %e, "Harasser did not finish cleanly");
                FAULT_STATUS
            }
            Err(_) => {
                warn!(harasser = self.id, ?limit, "Harasser did not stop in time, aborting");
                self.join.abort();
                TIMEOUT_STATUS
            }
        }
    }

    /// Abort the worker without waiting
    pub fn abort(&self) {
        self.join.abort();
    }
}

impl Drop for HarasserHandle {
    fn drop(&mut self) {
        if !self.join.is_finished() {
            debug!(harasser = self.id, "Handle dropped, aborting harasser");
            self.join.abort();
        }
    }
}
