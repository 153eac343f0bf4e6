//! End-to-end runs of scheduler and worker loops sharing one database.

mod common;

use chrono::Utc;
use common::{wait_until, CountingAction, TestDb};
use fleetcron::background_jobs::{
    ActionRegistry, SchedulerLoop, SchedulerSettings, WorkerLoop, WorkerSettings,
};
use fleetcron::coordination::{JobQueue, JobRegistry, LeaderElection, QueueSettings};
use fleetcron::store::{
    JobDefinitionStore, JobQueueStore, LeaderLockStore, QueueFilter, QueueStatus,
};
use fleetcron::{JobAdmin, TriggerOutcome};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn fast_worker_settings() -> WorkerSettings {
    WorkerSettings {
        poll_interval: Duration::from_millis(20),
        poll_jitter: Duration::from_millis(10),
        heartbeat_interval: Duration::from_millis(100),
    }
}

fn queue_settings(lease_seconds: i64) -> QueueSettings {
    QueueSettings {
        lease: chrono::Duration::seconds(lease_seconds),
        max_attempts: 3,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scheduled_job_runs_on_workers() {
    let db = TestDb::new();
    let admin = JobAdmin::new(db.open_store(), queue_settings(5));
    admin.add_job("job_a", 1, Utc::now()).unwrap();
    admin.add_job("job_paused", 1, Utc::now()).unwrap();
    admin.pause_job("job_paused").unwrap();

    let (action, runs) = CountingAction::new(Duration::from_millis(50));
    let mut actions = ActionRegistry::new();
    actions.register("job_a", Arc::new(action));
    let actions = Arc::new(actions);

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    // Two scheduler processes, only one of which may dispatch
    for owner in ["scheduler-1", "scheduler-2"] {
        let store = db.open_store();
        let mut scheduler = SchedulerLoop::new(
            LeaderElection::new(store.clone(), owner, chrono::Duration::seconds(2)),
            JobRegistry::new(store.clone()),
            Arc::new(JobQueue::new(store, queue_settings(5))),
            SchedulerSettings {
                tick_interval: Duration::from_millis(50),
            },
        );
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move { scheduler.run(token).await }));
    }

    for i in 0..3 {
        let worker = WorkerLoop::new(
            format!("worker-{}", i),
            Arc::new(JobQueue::new(db.open_store(), queue_settings(5))),
            actions.clone(),
            fast_worker_settings(),
        );
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move { worker.run(token).await }));
    }

    let ran_twice = wait_until(Duration::from_secs(10), || runs.load(Ordering::SeqCst) >= 2).await;
    shutdown.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
    assert!(ran_twice, "job_a should have run at least twice");

    let store = db.open_store();
    let stats = store.queue_stats().unwrap();
    assert_eq!(stats.failed, 0);
    assert!(stats.pending + stats.in_progress <= 1);
    assert_eq!(stats.done, runs.load(Ordering::SeqCst));

    let paused_entries = store
        .list_entries(
            &QueueFilter {
                job_id: Some("job_paused".to_string()),
                ..Default::default()
            },
            10,
        )
        .unwrap();
    assert!(paused_entries.is_empty());

    let job = store.get_job("job_a").unwrap().unwrap();
    assert!(job.last_run_time.is_some());
    assert!(job.next_run_time.is_some());

    // The leader resigned on shutdown
    let lock = store.get_lock().unwrap().unwrap();
    assert!(!lock.is_held_at(Utc::now()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_recovers_entry_of_crashed_worker() {
    let db = TestDb::new();
    let store = db.open_store();
    let admin = JobAdmin::new(store.clone(), queue_settings(1));
    admin.add_job("job_b", 3600, Utc::now()).unwrap();
    let TriggerOutcome::Enqueued { entry_id } = admin.trigger_job("job_b", Utc::now()).unwrap()
    else {
        panic!("job_b should have been enqueued");
    };

    // A worker claims the entry and dies without ever heartbeating
    JobQueue::new(db.open_store(), queue_settings(1))
        .claim("crashed", Utc::now())
        .unwrap()
        .unwrap();

    let (action, runs) = CountingAction::new(Duration::from_millis(10));
    let mut actions = ActionRegistry::new();
    actions.register("job_b", Arc::new(action));
    let worker = WorkerLoop::new(
        "survivor",
        Arc::new(JobQueue::new(db.open_store(), queue_settings(1))),
        Arc::new(actions),
        fast_worker_settings(),
    );
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { worker.run(token).await });

    let done = wait_until(Duration::from_secs(10), || {
        store
            .get_entry(entry_id)
            .unwrap()
            .is_some_and(|e| e.status == QueueStatus::Done)
    })
    .await;
    shutdown.cancel();
    handle.await.unwrap();
    assert!(done, "entry should have been recovered and completed");

    let entry = store.get_entry(entry_id).unwrap().unwrap();
    assert_eq!(entry.attempts, 1);
    assert_eq!(entry.worker_id.as_deref(), Some("survivor"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_finishes_running_entry() {
    let db = TestDb::new();
    let store = db.open_store();
    let admin = JobAdmin::new(store.clone(), queue_settings(5));
    admin.add_job("job_c", 3600, Utc::now()).unwrap();

    let (action, runs) = CountingAction::new(Duration::from_millis(400));
    let mut actions = ActionRegistry::new();
    actions.register("job_c", Arc::new(action));
    let worker = WorkerLoop::new(
        "worker",
        Arc::new(JobQueue::new(db.open_store(), queue_settings(5))),
        Arc::new(actions),
        fast_worker_settings(),
    );
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { worker.run(token).await });

    admin.trigger_job("job_c", Utc::now()).unwrap();
    let started = wait_until(Duration::from_secs(5), || {
        store.queue_stats().unwrap().in_progress == 1
    })
    .await;
    assert!(started);

    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(store.queue_stats().unwrap().done, 1);
}
