//! Coordination primitives built on the persisted store: leader election,
//! the job catalog, and the leased job queue.

mod job_registry;
mod leader;
mod queue;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};

pub use job_registry::JobRegistry;
pub use leader::{LeaderElection, DEFAULT_LOCK_TTL_SECONDS};
pub use queue::{
    JobQueue, QueueSettings, ReclaimReport, DEFAULT_LEASE_SECONDS, DEFAULT_MAX_ATTEMPTS,
    MAX_ATTEMPTS_ERROR,
};

/// `now + delta`, failing instead of overflowing chrono's range.
pub(crate) fn checked_offset(now: DateTime<Utc>, delta: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(delta)
        .ok_or_else(|| anyhow!("{} + {}s is out of range", now, delta.num_seconds()))
}
