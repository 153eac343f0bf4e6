//! Queue guarantees under contention from independent connections.

mod common;

use chrono::{Duration, Utc};
use common::TestDb;
use fleetcron::coordination::{JobQueue, QueueSettings, MAX_ATTEMPTS_ERROR};
use fleetcron::store::{JobDefinitionStore, JobQueueStore, QueueStatus};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_each_entry_claimed_exactly_once() {
    let db = TestDb::new();
    let now = Utc::now();
    let entries = 40;
    let workers = 6;

    let setup = db.open_store();
    for i in 0..entries {
        let job_id = format!("job_{:02}", i);
        setup.add_job(&job_id, 60, now).unwrap();
        setup.enqueue(&job_id, now).unwrap().unwrap();
    }

    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let store = db.open_store();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let worker_id = format!("worker-{}", i);
                let queue = JobQueue::new(store.clone(), QueueSettings::default());
                let mut claimed = Vec::new();
                barrier.wait();
                loop {
                    match queue.claim(&worker_id, now).unwrap() {
                        Some(entry) => {
                            assert_eq!(entry.worker_id.as_deref(), Some(worker_id.as_str()));
                            claimed.push((entry.id, worker_id.clone()));
                        }
                        // A contended round can come back empty while work remains
                        None if store.queue_stats().unwrap().pending == 0 => break,
                        None => {}
                    }
                }
                claimed
            })
        })
        .collect();

    let claimed: Vec<(i64, String)> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let unique: HashSet<i64> = claimed.iter().map(|(id, _)| *id).collect();
    assert_eq!(claimed.len(), entries);
    assert_eq!(unique.len(), entries);

    let store = db.open_store();
    for (entry_id, worker_id) in &claimed {
        let entry = store.get_entry(*entry_id).unwrap().unwrap();
        assert_eq!(entry.status, QueueStatus::InProgress);
        assert_eq!(entry.worker_id.as_ref(), Some(worker_id));
    }
}

#[test]
fn test_concurrent_enqueue_admits_one_entry() {
    let db = TestDb::new();
    let now = Utc::now();
    db.open_store().add_job("job_a", 5, now).unwrap();

    let contenders = 8;
    let barrier = Arc::new(Barrier::new(contenders));
    let handles: Vec<_> = (0..contenders)
        .map(|_| {
            let store = db.open_store();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                store.enqueue("job_a", now).unwrap()
            })
        })
        .collect();

    let inserted = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .count();
    assert_eq!(inserted, 1);
    assert_eq!(db.open_store().queue_stats().unwrap().pending, 1);
}

#[test]
fn test_expired_entry_is_reclaimed_by_one_process() {
    let db = TestDb::new();
    let settings = QueueSettings {
        lease: Duration::seconds(1),
        max_attempts: 3,
    };
    let now = Utc::now();
    let setup = db.open_store();
    setup.add_job("job_a", 5, now).unwrap();
    let entry_id = setup.enqueue("job_a", now).unwrap().unwrap();
    JobQueue::new(setup, settings)
        .claim("crashed", now)
        .unwrap()
        .unwrap();

    let reclaimers = 6;
    let later = now + Duration::seconds(2);
    let barrier = Arc::new(Barrier::new(reclaimers));
    let handles: Vec<_> = (0..reclaimers)
        .map(|_| {
            let queue = JobQueue::new(db.open_store(), settings);
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                queue.reclaim_stale(later).unwrap()
            })
        })
        .collect();

    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let requeued: usize = reports.iter().map(|r| r.requeued.len()).sum();
    let failed: usize = reports.iter().map(|r| r.failed.len()).sum();
    assert_eq!(requeued, 1);
    assert_eq!(failed, 0);

    let entry = db.open_store().get_entry(entry_id).unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Pending);
    assert_eq!(entry.attempts, 1);
}

#[test]
fn test_repeatedly_abandoned_entry_fails_after_max_attempts() {
    let db = TestDb::new();
    let settings = QueueSettings {
        lease: Duration::seconds(1),
        max_attempts: 2,
    };
    let store = db.open_store();
    let queue = JobQueue::new(store.clone(), settings);
    let mut now = Utc::now();
    store.add_job("job_a", 5, now).unwrap();
    let entry_id = store.enqueue("job_a", now).unwrap().unwrap();

    let mut executions = 0;
    while let Some(entry) = queue.claim("flaky", now).unwrap() {
        assert_eq!(entry.id, entry_id);
        executions += 1;
        // The worker dies without completing; the lease runs out
        now += Duration::seconds(2);
        queue.reclaim_stale(now).unwrap();
    }

    assert_eq!(executions, settings.max_attempts + 1);
    let entry = store.get_entry(entry_id).unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Failed);
    assert_eq!(entry.attempts, settings.max_attempts);
    assert_eq!(entry.last_error.as_deref(), Some(MAX_ATTEMPTS_ERROR));

    // A failed entry no longer blocks new runs of the job
    assert!(store.enqueue("job_a", now).unwrap().is_some());
}

#[test]
fn test_stale_worker_cannot_complete_reclaimed_entry() {
    let db = TestDb::new();
    let settings = QueueSettings {
        lease: Duration::seconds(1),
        max_attempts: 5,
    };
    let now = Utc::now();
    let slow_store = db.open_store();
    let fast_store = db.open_store();
    slow_store.add_job("job_a", 5, now).unwrap();
    let entry_id = slow_store.enqueue("job_a", now).unwrap().unwrap();

    let slow = JobQueue::new(slow_store, settings);
    let fast = JobQueue::new(fast_store, settings);
    slow.claim("slow", now).unwrap().unwrap();

    let later = now + Duration::seconds(2);
    fast.reclaim_stale(later).unwrap();
    fast.claim("fast", later).unwrap().unwrap();

    assert!(!slow.renew_lease(entry_id, "slow", later).unwrap());
    assert!(!slow.mark_done(entry_id, "slow", later).unwrap());
    assert!(fast.mark_done(entry_id, "fast", later).unwrap());

    let entry = db.open_store().get_entry(entry_id).unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Done);
    assert_eq!(entry.worker_id.as_deref(), Some("fast"));
}
