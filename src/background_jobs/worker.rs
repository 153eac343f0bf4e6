use super::context::ActionContext;
use super::registry::ActionRegistry;
use crate::coordination::JobQueue;
use crate::store::QueueEntry;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Random extra sleep added to each idle poll, up to this amount.
    pub poll_jitter: Duration,
    /// Lease renewal period while an action runs. Must be shorter than the lease.
    pub heartbeat_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poll_jitter: Duration::from_millis(250),
            heartbeat_interval: Duration::from_secs(1),
        }
    }
}

/// How the execution of a claimed entry ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(String),
    /// The lease was taken away; nothing was recorded for this execution.
    LeaseLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerTick {
    Idle,
    Executed {
        entry_id: i64,
        job_id: String,
        outcome: RunOutcome,
    },
}

/// Claims queue entries and runs their actions under a renewed lease.
pub struct WorkerLoop {
    worker_id: String,
    queue: Arc<JobQueue>,
    actions: Arc<ActionRegistry>,
    settings: WorkerSettings,
}

impl WorkerLoop {
    pub fn new(
        worker_id: impl Into<String>,
        queue: Arc<JobQueue>,
        actions: Arc<ActionRegistry>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue,
            actions,
            settings,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Reclaim stale entries, then claim and execute at most one entry.
    pub async fn tick(&self) -> Result<WorkerTick> {
        let now = Utc::now();
        if let Err(e) = self.queue.reclaim_stale(now) {
            warn!("Worker {} failed to reclaim stale entries: {:#}", self.worker_id, e);
        }

        let Some(entry) = self.queue.claim(&self.worker_id, now)? else {
            return Ok(WorkerTick::Idle);
        };
        let outcome = self.execute(&entry).await?;
        Ok(WorkerTick::Executed {
            entry_id: entry.id,
            job_id: entry.job_id,
            outcome,
        })
    }

    /// Run the action for a claimed entry while heartbeating its lease.
    ///
    /// Action errors and panics are recorded on the entry and never
    /// propagate. If a heartbeat finds the lease gone, the action is told to
    /// cancel and left to finish on its own; its result is discarded.
    async fn execute(&self, entry: &QueueEntry) -> Result<RunOutcome> {
        let action = self.actions.resolve(&entry.job_id);
        let cancellation_token = CancellationToken::new();
        let ctx = ActionContext::new(
            cancellation_token.clone(),
            entry.job_id.clone(),
            entry.id,
            entry.attempts,
        );
        info!(
            "Worker {} running {} (entry {}, attempt {}): {}",
            self.worker_id,
            entry.job_id,
            entry.id,
            entry.attempts + 1,
            action.description()
        );

        let started = Instant::now();
        let mut task = tokio::task::spawn_blocking(move || action.execute(&ctx));

        let mut heartbeat = tokio::time::interval(self.settings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately and the lease was just granted
        heartbeat.tick().await;

        let result = loop {
            tokio::select! {
                result = &mut task => break result,
                _ = heartbeat.tick() => {
                    match self.queue.renew_lease(entry.id, &self.worker_id, Utc::now()) {
                        Ok(true) => debug!("Renewed lease on entry {}", entry.id),
                        Ok(false) => {
                            warn!(
                                "Worker {} lost the lease on entry {} ({}), abandoning it",
                                self.worker_id, entry.id, entry.job_id
                            );
                            cancellation_token.cancel();
                            return Ok(RunOutcome::LeaseLost);
                        }
                        Err(e) => warn!("Heartbeat for entry {} failed: {:#}", entry.id, e),
                    }
                }
            }
        };

        let elapsed = started.elapsed();
        let now = Utc::now();
        match result {
            Ok(Ok(())) => {
                if !self.queue.mark_done(entry.id, &self.worker_id, now)? {
                    warn!(
                        "Entry {} ({}) finished after its lease was lost, result not recorded",
                        entry.id, entry.job_id
                    );
                    return Ok(RunOutcome::LeaseLost);
                }
                self.queue.record_success(&entry.job_id, now)?;
                info!(
                    "Entry {} ({}) completed in {:?}",
                    entry.id, entry.job_id, elapsed
                );
                Ok(RunOutcome::Completed)
            }
            Ok(Err(e)) => {
                error!(
                    "Entry {} ({}) failed after {:?}: {}",
                    entry.id, entry.job_id, elapsed, e
                );
                self.report_failure(entry, e.to_string(), now)
            }
            Err(e) => {
                error!(
                    "Entry {} ({}) panicked after {:?}: {}",
                    entry.id, entry.job_id, elapsed, e
                );
                self.report_failure(entry, format!("action panicked: {}", e), now)
            }
        }
    }

    fn report_failure(
        &self,
        entry: &QueueEntry,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome> {
        if self
            .queue
            .mark_failed(entry.id, &self.worker_id, &message, now)?
        {
            Ok(RunOutcome::Failed(message))
        } else {
            warn!(
                "Entry {} ({}) failed after its lease was lost, error not recorded",
                entry.id, entry.job_id
            );
            Ok(RunOutcome::LeaseLost)
        }
    }

    fn idle_delay(&self) -> Duration {
        let jitter_ms = self.settings.poll_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.settings.poll_interval;
        }
        self.settings.poll_interval + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// An entry that is already executing is finished before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Starting worker {} (heartbeat every {:?})",
            self.worker_id, self.settings.heartbeat_interval
        );

        while !shutdown.is_cancelled() {
            let idle = match self.tick().await {
                Ok(WorkerTick::Idle) => true,
                Ok(WorkerTick::Executed { .. }) => false,
                Err(e) => {
                    error!("Worker {} tick failed: {:#}", self.worker_id, e);
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.idle_delay()) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
        }

        info!("Worker {} stopped", self.worker_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::{JobAction, JobError};
    use crate::coordination::QueueSettings;
    use crate::store::{JobDefinitionStore, JobQueueStore, QueueStatus, SqliteCoordinationStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingAction {
        runs: Arc<AtomicUsize>,
        sleep: Duration,
    }

    impl JobAction for CountingAction {
        fn description(&self) -> String {
            "count".to_string()
        }

        fn execute(&self, _ctx: &ActionContext) -> Result<(), JobError> {
            std::thread::sleep(self.sleep);
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingAction;

    impl JobAction for FailingAction {
        fn description(&self) -> String {
            "fail".to_string()
        }

        fn execute(&self, _ctx: &ActionContext) -> Result<(), JobError> {
            Err(JobError::ExecutionFailed("disk full".to_string()))
        }
    }

    struct PanickingAction;

    impl JobAction for PanickingAction {
        fn description(&self) -> String {
            "panic".to_string()
        }

        fn execute(&self, _ctx: &ActionContext) -> Result<(), JobError> {
            panic!("kaboom");
        }
    }

    /// Blocks until cancelled, then reports whether cancellation was seen.
    struct BlockingAction {
        saw_cancel: Arc<AtomicUsize>,
    }

    impl JobAction for BlockingAction {
        fn description(&self) -> String {
            "block".to_string()
        }

        fn execute(&self, ctx: &ActionContext) -> Result<(), JobError> {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if ctx.is_cancelled() {
                    self.saw_cancel.fetch_add(1, Ordering::SeqCst);
                    return Err(JobError::Cancelled);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Ok(())
        }
    }

    fn fast_settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(10),
            poll_jitter: Duration::from_millis(5),
            heartbeat_interval: Duration::from_millis(50),
        }
    }

    fn setup(actions: ActionRegistry) -> (WorkerLoop, Arc<SqliteCoordinationStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteCoordinationStore::new(temp_dir.path().join("worker.db")).unwrap());
        let queue = Arc::new(JobQueue::new(store.clone(), QueueSettings::default()));
        let worker = WorkerLoop::new("w1", queue, Arc::new(actions), fast_settings());
        (worker, store, temp_dir)
    }

    #[tokio::test]
    async fn test_idle_when_queue_empty() {
        let (worker, _store, _dir) = setup(ActionRegistry::new());
        assert_eq!(worker.tick().await.unwrap(), WorkerTick::Idle);
    }

    #[tokio::test]
    async fn test_success_marks_done_and_sets_last_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut actions = ActionRegistry::new();
        actions.register(
            "job_a",
            Arc::new(CountingAction {
                runs: runs.clone(),
                sleep: Duration::from_millis(180),
            }),
        );
        let (worker, store, _dir) = setup(actions);
        let now = Utc::now();
        store.add_job("job_a", 5, now).unwrap();
        let id = store.enqueue("job_a", now).unwrap().unwrap();

        let tick = worker.tick().await.unwrap();
        assert_eq!(
            tick,
            WorkerTick::Executed {
                entry_id: id,
                job_id: "job_a".to_string(),
                outcome: RunOutcome::Completed,
            }
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let entry = store.get_entry(id).unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Done);
        assert!(entry.executed_at.is_some());
        assert!(store.get_job("job_a").unwrap().unwrap().last_run_time.is_some());
    }

    #[tokio::test]
    async fn test_unregistered_job_runs_placeholder() {
        let (worker, store, _dir) = setup(ActionRegistry::new());
        let now = Utc::now();
        store.add_job("job_b", 10, now).unwrap();
        let id = store.enqueue("job_b", now).unwrap().unwrap();

        worker.tick().await.unwrap();
        assert_eq!(store.get_entry(id).unwrap().unwrap().status, QueueStatus::Done);
    }

    #[tokio::test]
    async fn test_action_error_marks_failed() {
        let mut actions = ActionRegistry::new();
        actions.register("job_a", Arc::new(FailingAction));
        let (worker, store, _dir) = setup(actions);
        let now = Utc::now();
        store.add_job("job_a", 5, now).unwrap();
        let id = store.enqueue("job_a", now).unwrap().unwrap();

        match worker.tick().await.unwrap() {
            WorkerTick::Executed {
                outcome: RunOutcome::Failed(message),
                ..
            } => assert!(message.contains("disk full")),
            other => panic!("unexpected tick: {:?}", other),
        }
        let entry = store.get_entry(id).unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Failed);
        assert!(entry.last_error.unwrap().contains("disk full"));
        assert!(store.get_job("job_a").unwrap().unwrap().last_run_time.is_none());
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let mut actions = ActionRegistry::new();
        actions.register("job_a", Arc::new(PanickingAction));
        let (worker, store, _dir) = setup(actions);
        let now = Utc::now();
        store.add_job("job_a", 5, now).unwrap();
        store.add_job("job_b", 5, now).unwrap();
        let a = store.enqueue("job_a", now).unwrap().unwrap();
        let b = store.enqueue("job_b", now).unwrap().unwrap();

        worker.tick().await.unwrap();
        let failed = store.get_entry(a).unwrap().unwrap();
        assert_eq!(failed.status, QueueStatus::Failed);
        assert!(failed.last_error.unwrap().starts_with("action panicked"));

        // The worker keeps going after a panic
        worker.tick().await.unwrap();
        assert_eq!(store.get_entry(b).unwrap().unwrap().status, QueueStatus::Done);
    }

    #[tokio::test]
    async fn test_lost_lease_cancels_action_and_records_nothing() {
        let saw_cancel = Arc::new(AtomicUsize::new(0));
        let mut actions = ActionRegistry::new();
        actions.register(
            "job_a",
            Arc::new(BlockingAction {
                saw_cancel: saw_cancel.clone(),
            }),
        );
        let (worker, store, _dir) = setup(actions);
        let now = Utc::now();
        store.add_job("job_a", 5, now).unwrap();
        let id = store.enqueue("job_a", now).unwrap().unwrap();

        // Another process reclaims the entry while the action is running
        let reclaimer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            let queue = JobQueue::new(reclaimer, QueueSettings::default());
            queue
                .reclaim_stale(Utc::now() + chrono::Duration::seconds(60))
                .unwrap();
        });

        let tick = worker.tick().await.unwrap();
        assert_eq!(
            tick,
            WorkerTick::Executed {
                entry_id: id,
                job_id: "job_a".to_string(),
                outcome: RunOutcome::LeaseLost,
            }
        );

        let entry = store.get_entry(id).unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::Pending);
        assert_eq!(entry.attempts, 1);
        assert!(entry.last_error.is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(saw_cancel.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_drains_queue_until_cancelled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut actions = ActionRegistry::new();
        for job_id in ["job_a", "job_b", "job_c"] {
            actions.register(
                job_id,
                Arc::new(CountingAction {
                    runs: runs.clone(),
                    sleep: Duration::ZERO,
                }),
            );
        }
        let (worker, store, _dir) = setup(actions);
        let now = Utc::now();
        for job_id in ["job_a", "job_b", "job_c"] {
            store.add_job(job_id, 5, now).unwrap();
            store.enqueue(job_id, now).unwrap();
        }

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { worker.run(token).await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(store.queue_stats().unwrap().done, 3);
    }
}
