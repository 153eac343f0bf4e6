//! Common test infrastructure
//!
//! Every "process" in these tests gets its own [`SqliteCoordinationStore`]
//! over the same database file, so the only thing they share is SQLite.
#![allow(dead_code)]

use fleetcron::background_jobs::{ActionContext, JobAction, JobError};
use fleetcron::SqliteCoordinationStore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestDb {
    _dir: TempDir,
    pub path: PathBuf,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fleetcron.db");
        // Create the schema once up front
        SqliteCoordinationStore::new(&path).unwrap();
        TestDb { _dir: dir, path }
    }

    /// Open an independent connection, as a separate process would.
    pub fn open_store(&self) -> Arc<SqliteCoordinationStore> {
        Arc::new(SqliteCoordinationStore::new(&self.path).unwrap())
    }
}

/// Counts executions and sleeps for a fixed time on each.
pub struct CountingAction {
    pub runs: Arc<AtomicUsize>,
    pub duration: Duration,
}

impl CountingAction {
    pub fn new(duration: Duration) -> (Self, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (
            CountingAction {
                runs: runs.clone(),
                duration,
            },
            runs,
        )
    }
}

impl JobAction for CountingAction {
    fn description(&self) -> String {
        "Counting test action".to_string()
    }

    fn execute(&self, ctx: &ActionContext) -> Result<(), JobError> {
        std::thread::sleep(self.duration);
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}
