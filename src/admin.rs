//! Operator-facing job management.
//!
//! Used by the `cli-jobs` tool and to seed jobs declared in the config file.

use crate::config::JobSeed;
use crate::coordination::{JobQueue, QueueSettings, ReclaimReport};
use crate::store::{
    CoordinationStore, DeleteJobOutcome, JobDefinition, JobDefinitionStore, JobQueueStore,
    QueueEntry, QueueFilter, QueueStats, MAX_INTERVAL_SECONDS,
};
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;

/// Result of a manual trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Enqueued { entry_id: i64 },
    AlreadyInFlight,
    NotFound,
}

pub struct JobAdmin {
    store: Arc<dyn CoordinationStore>,
    queue: JobQueue,
}

impl JobAdmin {
    pub fn new(store: Arc<dyn CoordinationStore>, queue_settings: QueueSettings) -> Self {
        let queue = JobQueue::new(store.clone(), queue_settings);
        Self { store, queue }
    }

    /// Define a job. Returns false if a job with this id already exists,
    /// in which case it is left untouched.
    pub fn add_job(&self, id: &str, interval_seconds: i64, now: DateTime<Utc>) -> Result<bool> {
        if id.trim().is_empty() {
            bail!("Job id must not be empty");
        }
        if interval_seconds <= 0 || interval_seconds > MAX_INTERVAL_SECONDS {
            bail!(
                "interval_seconds must be between 1 and {}, got {}",
                MAX_INTERVAL_SECONDS,
                interval_seconds
            );
        }
        let created = self.store.add_job(id, interval_seconds, now)?;
        if created {
            info!("Added job {} (every {}s)", id, interval_seconds);
        }
        Ok(created)
    }

    /// Returns false if the job does not exist.
    pub fn pause_job(&self, id: &str) -> Result<bool> {
        self.store.set_paused(id, true)
    }

    /// Returns false if the job does not exist.
    pub fn resume_job(&self, id: &str) -> Result<bool> {
        self.store.set_paused(id, false)
    }

    /// Delete a job and its pending entries. Finished entries stay for audit.
    pub fn delete_job(&self, id: &str) -> Result<DeleteJobOutcome> {
        let outcome = self.store.delete_job(id)?;
        if let DeleteJobOutcome::Deleted { purged_pending } = outcome {
            info!("Deleted job {} ({} pending entries purged)", id, purged_pending);
        }
        Ok(outcome)
    }

    /// Enqueue a job now, outside its schedule. The next run time is not
    /// changed.
    pub fn trigger_job(&self, id: &str, now: DateTime<Utc>) -> Result<TriggerOutcome> {
        if self.store.get_job(id)?.is_none() {
            return Ok(TriggerOutcome::NotFound);
        }
        Ok(match self.queue.enqueue(id, now)? {
            Some(entry_id) => TriggerOutcome::Enqueued { entry_id },
            None => TriggerOutcome::AlreadyInFlight,
        })
    }

    pub fn list_jobs(&self) -> Result<Vec<JobDefinition>> {
        self.store.list_jobs()
    }

    pub fn list_queue(&self, filter: &QueueFilter, limit: usize) -> Result<Vec<QueueEntry>> {
        self.store.list_entries(filter, limit)
    }

    pub fn get_entry(&self, entry_id: i64) -> Result<Option<QueueEntry>> {
        self.store.get_entry(entry_id)
    }

    pub fn queue_stats(&self) -> Result<QueueStats> {
        self.store.queue_stats()
    }

    pub fn reclaim(&self, now: DateTime<Utc>) -> Result<ReclaimReport> {
        self.queue.reclaim_stale(now)
    }

    /// Delete finished entries enqueued more than `retention` ago.
    pub fn prune_history(&self, retention: Duration, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now
            .checked_sub_signed(retention)
            .ok_or_else(|| anyhow!("Retention of {} days is out of range", retention.num_days()))?;
        let deleted = self.store.prune_terminal_entries(cutoff)?;
        if deleted > 0 {
            info!("Pruned {} finished queue entries", deleted);
        }
        Ok(deleted)
    }

    /// Create the configured jobs that do not exist yet.
    ///
    /// Existing jobs keep their stored interval and pause flag, so changes
    /// made by an operator survive restarts. Returns how many were created.
    pub fn seed_jobs(&self, seeds: &[JobSeed], now: DateTime<Utc>) -> Result<usize> {
        let mut created = 0;
        for seed in seeds {
            if self.add_job(&seed.id, seed.interval_seconds, now)? {
                if seed.paused {
                    self.pause_job(&seed.id)?;
                }
                created += 1;
            }
        }
        Ok(created)
    }
}
