//! Coordination store trait definitions.
//!
//! Every mutation is a conditional update keyed on an expected prior state, so
//! the traits can be shared by independent processes that only talk through
//! the database. Methods that depend on the current time take it explicitly.

use super::models::{
    DeleteJobOutcome, JobDefinition, LeaderLock, QueueEntry, QueueFilter, QueueStats,
};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Storage for job definitions.
pub trait JobDefinitionStore: Send + Sync {
    /// Insert a job definition if no job with this id exists.
    /// Returns true if it was inserted.
    fn add_job(&self, id: &str, interval_seconds: i64, now: DateTime<Utc>) -> Result<bool>;

    fn get_job(&self, id: &str) -> Result<Option<JobDefinition>>;

    /// All job definitions ordered by id.
    fn list_jobs(&self) -> Result<Vec<JobDefinition>>;

    /// Returns false if the job does not exist.
    fn set_paused(&self, id: &str, paused: bool) -> Result<bool>;

    fn set_next_run_time(&self, id: &str, next_run_time: DateTime<Utc>) -> Result<bool>;

    fn set_last_run_time(&self, id: &str, last_run_time: DateTime<Utc>) -> Result<bool>;

    /// Delete a job definition along with its pending queue entries.
    ///
    /// Refused while an entry for the job is in progress. Terminal entries
    /// are kept.
    fn delete_job(&self, id: &str) -> Result<DeleteJobOutcome>;
}

/// Storage for the leased job queue.
pub trait JobQueueStore: Send + Sync {
    // === Admission ===

    /// Insert a pending entry unless the job is undefined or already has a
    /// pending or in-progress entry. The check and the insert are atomic.
    /// Returns the new entry id.
    fn enqueue(&self, job_id: &str, now: DateTime<Utc>) -> Result<Option<i64>>;

    // === State Transitions (atomic) ===

    /// Oldest pending entries, ordered by `enqueued_at` then id.
    fn pending_candidates(&self, limit: usize) -> Result<Vec<QueueEntry>>;

    /// Claim a specific entry (pending -> in_progress).
    /// Returns false if it was no longer pending.
    fn try_claim(
        &self,
        entry_id: i64,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Extend the lease held by `worker_id`. Returns false if the lease was lost.
    fn renew_lease(
        &self,
        entry_id: i64,
        worker_id: &str,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// in_progress -> done. Returns false if `worker_id` no longer holds the lease.
    fn mark_done(&self, entry_id: i64, worker_id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// in_progress -> failed. Returns false if `worker_id` no longer holds the lease.
    fn mark_failed(
        &self,
        entry_id: i64,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    // === Reclamation ===

    /// In-progress entries whose lease expired before `now`.
    fn expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<QueueEntry>>;

    /// Return an expired entry to pending and bump its attempts.
    /// Only applies if the entry is still expired with `observed_attempts`.
    fn requeue_expired(
        &self,
        entry_id: i64,
        observed_attempts: i64,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Permanently fail an expired entry.
    /// Only applies if the entry is still expired with `observed_attempts`.
    fn fail_expired(
        &self,
        entry_id: i64,
        observed_attempts: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    // === Inspection ===

    fn get_entry(&self, entry_id: i64) -> Result<Option<QueueEntry>>;

    /// Entries matching `filter`, newest first.
    fn list_entries(&self, filter: &QueueFilter, limit: usize) -> Result<Vec<QueueEntry>>;

    fn queue_stats(&self) -> Result<QueueStats>;

    /// Delete terminal entries enqueued before `older_than`.
    /// Returns the number of deleted entries.
    fn prune_terminal_entries(&self, older_than: DateTime<Utc>) -> Result<usize>;
}

/// Storage for the singleton leader lock.
pub trait LeaderLockStore: Send + Sync {
    /// Create the lock row owned by `owner_id` if it does not exist yet.
    /// Returns true if it was created.
    fn create_lock_if_absent(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Overwrite the lock if it expired at or before `now`, or is already
    /// owned by `owner_id`. Returns true if the row was updated.
    fn take_over_lock(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Extend the lock if still owned by `owner_id`.
    fn extend_lock(&self, owner_id: &str, expires_at: DateTime<Utc>) -> Result<bool>;

    /// Expire the lock immediately if owned by `owner_id`.
    fn release_lock(&self, owner_id: &str, now: DateTime<Utc>) -> Result<bool>;

    fn get_lock(&self) -> Result<Option<LeaderLock>>;
}

/// Combined trait for everything a scheduler or worker process needs.
pub trait CoordinationStore: JobDefinitionStore + JobQueueStore + LeaderLockStore {}

impl<T: JobDefinitionStore + JobQueueStore + LeaderLockStore> CoordinationStore for T {}
