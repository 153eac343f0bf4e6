//! Data models for the coordination database.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Identifier of the singleton leader lock row.
pub const LEADER_LOCK_ID: &str = "scheduler_leader";

/// Upper bound for job intervals and configured lease or lock durations.
pub const MAX_INTERVAL_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// A periodically triggered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub id: String,
    pub interval_seconds: i64,
    pub paused: bool,
    /// Last successful completion.
    pub last_run_time: Option<DateTime<Utc>>,
    /// Next time the scheduler may enqueue this job. `None` means immediately.
    pub next_run_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JobDefinition {
    /// Fails for intervals chrono cannot represent, which only a row written
    /// around the admin checks can hold.
    pub fn interval(&self) -> Result<Duration> {
        Duration::try_seconds(self.interval_seconds).ok_or_else(|| {
            anyhow!(
                "Job {} has an unrepresentable interval of {}s",
                self.id,
                self.interval_seconds
            )
        })
    }

    /// Whether the job's next run time has been reached. Ignores `paused`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.next_run_time {
            None => true,
            Some(next_run) => now >= next_run,
        }
    }

    /// Whether the scheduler should try to enqueue this job now.
    pub fn is_schedulable(&self, now: DateTime<Utc>) -> bool {
        !self.paused && self.is_due(now)
    }
}

/// Status of a queue entry.
///
/// Transitions:
/// - Pending -> InProgress (claim)
/// - InProgress -> Done | Failed (completion by the lease holder)
/// - InProgress -> Pending | Failed (reclaim after lease expiry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 4] = [
        QueueStatus::Pending,
        QueueStatus::InProgress,
        QueueStatus::Done,
        QueueStatus::Failed,
    ];

    pub fn as_db_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Done => "done",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "in_progress" => Some(QueueStatus::InProgress),
            "done" => Some(QueueStatus::Done),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Done | QueueStatus::Failed)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// One execution request for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: i64,
    pub job_id: String,
    pub status: QueueStatus,
    /// Number of times the entry was returned to pending after a lease expired.
    pub attempts: i64,
    /// Current (or last) lease holder.
    pub worker_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl QueueEntry {
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::InProgress
            && self.lease_expires_at.is_some_and(|expires| expires < now)
    }
}

/// The leadership record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderLock {
    pub owner_id: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaderLock {
    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Entry counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.done + self.failed
    }
}

/// Filter for listing queue entries.
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub status: Option<QueueStatus>,
    pub job_id: Option<String>,
}

/// Result of deleting a job definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteJobOutcome {
    Deleted { purged_pending: usize },
    NotFound,
    /// An entry for the job is currently being executed.
    InProgress,
}

pub(crate) fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
