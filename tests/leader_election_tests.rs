//! Leadership across independent connections to the same database.

mod common;

use chrono::{Duration, Utc};
use common::TestDb;
use fleetcron::background_jobs::{SchedulerLoop, SchedulerSettings};
use fleetcron::coordination::{JobQueue, JobRegistry, LeaderElection, QueueSettings};
use fleetcron::store::{JobDefinitionStore, JobQueueStore, LeaderLockStore, QueueStatus};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_concurrent_acquire_elects_single_leader() {
    let db = TestDb::new();
    let contenders = 8;
    let barrier = Arc::new(Barrier::new(contenders));
    let now = Utc::now();

    let handles: Vec<_> = (0..contenders)
        .map(|i| {
            let store = db.open_store();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let election = LeaderElection::new(store, format!("owner-{}", i), Duration::seconds(10));
                barrier.wait();
                election.try_acquire(now).unwrap()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);

    let lock = db.open_store().get_lock().unwrap().unwrap();
    assert!(lock.owner_id.starts_with("owner-"));
    assert!(lock.is_held_at(now));
}

#[test]
fn test_standby_takes_over_after_ttl() {
    let db = TestDb::new();
    let ttl = Duration::seconds(3);
    let primary = LeaderElection::new(db.open_store(), "primary", ttl);
    let standby = LeaderElection::new(db.open_store(), "standby", ttl);
    let t0 = Utc::now();

    assert!(primary.try_acquire(t0).unwrap());
    assert!(!standby.try_acquire(t0 + Duration::seconds(1)).unwrap());

    // Primary stops renewing. Just before expiry the lock still holds.
    assert!(!standby
        .try_acquire(t0 + ttl - Duration::milliseconds(1))
        .unwrap());
    assert!(standby.try_acquire(t0 + ttl).unwrap());

    // The old leader finds out on its next renewal
    assert!(!primary.renew(t0 + ttl + Duration::seconds(1)).unwrap());
    assert!(!primary.try_acquire(t0 + ttl + Duration::seconds(1)).unwrap());
}

#[test]
fn test_resign_hands_over_immediately() {
    let db = TestDb::new();
    let ttl = Duration::seconds(30);
    let primary = LeaderElection::new(db.open_store(), "primary", ttl);
    let standby = LeaderElection::new(db.open_store(), "standby", ttl);
    let now = Utc::now();

    assert!(primary.try_acquire(now).unwrap());
    assert!(primary.resign(now).unwrap());
    assert!(standby.try_acquire(now).unwrap());
    assert!(!primary.resign(now).unwrap());
}

#[test]
fn test_only_leader_dispatches() {
    let db = TestDb::new();
    let now = Utc::now();
    db.open_store().add_job("job_a", 3600, now).unwrap();

    let build = |owner: &str| {
        let store = db.open_store();
        SchedulerLoop::new(
            LeaderElection::new(store.clone(), owner, Duration::seconds(5)),
            JobRegistry::new(store.clone()),
            Arc::new(JobQueue::new(store, QueueSettings::default())),
            SchedulerSettings::default(),
        )
    };
    let mut first = build("first");
    let mut second = build("second");

    let report = first.tick(now).unwrap();
    assert!(report.is_leader);
    assert_eq!(report.enqueued, vec!["job_a".to_string()]);

    let report = second.tick(now).unwrap();
    assert!(!report.is_leader);
    assert!(report.enqueued.is_empty());

    // First scheduler dies. The standby takes over once the lock expires and
    // does not double-dispatch a job that is not due yet.
    let later = now + Duration::seconds(6);
    let report = second.tick(later).unwrap();
    assert!(report.is_leader);
    assert!(report.enqueued.is_empty());

    let store = db.open_store();
    let stats = store.queue_stats().unwrap();
    assert_eq!(stats.pending, 1);
    let job = store.get_job("job_a").unwrap().unwrap();
    assert_eq!(
        job.next_run_time.unwrap().timestamp_millis(),
        (now + Duration::seconds(3600)).timestamp_millis()
    );
    let entries = store.pending_candidates(10).unwrap();
    assert_eq!(entries[0].status, QueueStatus::Pending);
}
