//! The leased job queue.
//!
//! Wraps the raw store transitions with lease bookkeeping: claim retries
//! across candidates, lease expiry computation, and bounded reclamation of
//! entries whose holder stopped renewing.

use super::checked_offset;
use crate::store::{CoordinationStore, JobDefinitionStore, JobQueueStore, QueueEntry, QueueStatus};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_LEASE_SECONDS: i64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;

/// Error recorded on entries that exhausted their reclaim budget.
pub const MAX_ATTEMPTS_ERROR: &str = "max attempts exceeded";

/// How many pending entries to look at per claim round.
const CLAIM_BATCH_SIZE: usize = 8;
/// Claim rounds before giving up when every candidate was taken by others.
const CLAIM_ROUNDS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    /// Lease granted on claim and on every renewal.
    pub lease: Duration,
    /// Expired entries are requeued while `attempts < max_attempts`.
    pub max_attempts: i64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            lease: Duration::seconds(DEFAULT_LEASE_SECONDS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Entries touched by one reclaim pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub requeued: Vec<i64>,
    pub failed: Vec<i64>,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

pub struct JobQueue {
    store: Arc<dyn CoordinationStore>,
    settings: QueueSettings,
}

impl JobQueue {
    pub fn new(store: Arc<dyn CoordinationStore>, settings: QueueSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Add a pending entry for `job_id`.
    ///
    /// Returns `None` when the job already has a pending or in-progress
    /// entry, or is not defined.
    pub fn enqueue(&self, job_id: &str, now: DateTime<Utc>) -> Result<Option<i64>> {
        let entry_id = self.store.enqueue(job_id, now)?;
        match entry_id {
            Some(id) => debug!("Enqueued {} as entry {}", job_id, id),
            None => debug!("Not enqueuing {}: already in flight or undefined", job_id),
        }
        Ok(entry_id)
    }

    /// Claim the oldest pending entry for `worker_id`.
    ///
    /// Losing a race on one candidate moves on to the next; after a few
    /// fully contended rounds this reports no work rather than spinning.
    pub fn claim(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<QueueEntry>> {
        let lease_expires_at = checked_offset(now, self.settings.lease)?;
        for _ in 0..CLAIM_ROUNDS {
            let candidates = self.store.pending_candidates(CLAIM_BATCH_SIZE)?;
            if candidates.is_empty() {
                return Ok(None);
            }
            for candidate in candidates {
                if self
                    .store
                    .try_claim(candidate.id, worker_id, now, lease_expires_at)?
                {
                    debug!(
                        "Worker {} claimed entry {} ({})",
                        worker_id, candidate.id, candidate.job_id
                    );
                    return Ok(Some(QueueEntry {
                        status: QueueStatus::InProgress,
                        worker_id: Some(worker_id.to_string()),
                        started_at: Some(now),
                        lease_expires_at: Some(lease_expires_at),
                        ..candidate
                    }));
                }
                debug!("Entry {} was claimed by another worker", candidate.id);
            }
        }
        Ok(None)
    }

    /// Heartbeat. Returns false if `worker_id` lost the lease.
    pub fn renew_lease(&self, entry_id: i64, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.store
            .renew_lease(entry_id, worker_id, checked_offset(now, self.settings.lease)?)
    }

    /// Returns false if the lease was lost and the result was not recorded.
    pub fn mark_done(&self, entry_id: i64, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.store.mark_done(entry_id, worker_id, now)
    }

    /// Returns false if the lease was lost and the error was not recorded.
    pub fn mark_failed(
        &self,
        entry_id: i64,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.store.mark_failed(entry_id, worker_id, error, now)
    }

    /// Requeue or fail every in-progress entry whose lease expired.
    ///
    /// Safe to run from any number of processes at once: each transition
    /// re-checks the state it observed, so an entry is handled by exactly
    /// one caller.
    pub fn reclaim_stale(&self, now: DateTime<Utc>) -> Result<ReclaimReport> {
        let mut report = ReclaimReport::default();
        for entry in self.store.expired_leases(now)? {
            if entry.attempts < self.settings.max_attempts {
                if self.store.requeue_expired(entry.id, entry.attempts, now)? {
                    warn!(
                        "Lease expired on entry {} ({}) held by {}, requeued (attempt {})",
                        entry.id,
                        entry.job_id,
                        entry.worker_id.as_deref().unwrap_or("?"),
                        entry.attempts + 1
                    );
                    report.requeued.push(entry.id);
                }
            } else if self
                .store
                .fail_expired(entry.id, entry.attempts, MAX_ATTEMPTS_ERROR, now)?
            {
                warn!(
                    "Entry {} ({}) exceeded {} attempts, marked failed",
                    entry.id, entry.job_id, self.settings.max_attempts
                );
                report.failed.push(entry.id);
            }
        }
        if !report.is_empty() {
            info!(
                "Reclaimed {} expired entries ({} requeued, {} failed)",
                report.requeued.len() + report.failed.len(),
                report.requeued.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }

    /// Push the job's next run to `now + interval`.
    ///
    /// Only called after a successful enqueue, so a job that could not be
    /// enqueued stays due and is retried on the next tick. Fails without
    /// touching the job if `now + interval` is out of range.
    pub fn advance_next_run(
        &self,
        job_id: &str,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let next_run = checked_offset(now, interval)?;
        if !self.store.set_next_run_time(job_id, next_run)? {
            warn!("Job {} disappeared before its next run could be set", job_id);
        }
        Ok(next_run)
    }

    /// Record a successful completion on the job definition.
    pub fn record_success(&self, job_id: &str, now: DateTime<Utc>) -> Result<()> {
        if !self.store.set_last_run_time(job_id, now)? {
            debug!("Job {} no longer defined, last run not recorded", job_id);
        }
        Ok(())
    }
}
