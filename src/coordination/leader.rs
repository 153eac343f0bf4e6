//! TTL-based leader election over the singleton lock row.

use super::checked_offset;
use crate::store::LeaderLockStore;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_LOCK_TTL_SECONDS: i64 = 10;

/// Leadership handle for one process.
///
/// Holding leadership is never cached across calls: every scheduling cycle
/// has to go through [`LeaderElection::try_acquire`] and
/// [`LeaderElection::renew`] again.
pub struct LeaderElection {
    store: Arc<dyn LeaderLockStore>,
    owner_id: String,
    ttl: Duration,
}

impl LeaderElection {
    pub fn new(store: Arc<dyn LeaderLockStore>, owner_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            owner_id: owner_id.into(),
            ttl,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Try to become (or stay) leader.
    ///
    /// Creates the lock row if missing, takes it over if it expired or is
    /// already ours, then reads it back. Only the read-back decides the
    /// result, so a concurrent winner is never mistaken for us.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> Result<bool> {
        let expires_at = checked_offset(now, self.ttl)?;
        if self
            .store
            .create_lock_if_absent(&self.owner_id, now, expires_at)?
        {
            debug!("Created leader lock owned by {}", self.owner_id);
        }
        self.store.take_over_lock(&self.owner_id, now, expires_at)?;

        let lock = self.store.get_lock()?;
        Ok(lock.is_some_and(|lock| lock.owner_id == self.owner_id))
    }

    /// Extend our lease. Returns false if another process owns the lock.
    pub fn renew(&self, now: DateTime<Utc>) -> Result<bool> {
        self.store
            .extend_lock(&self.owner_id, checked_offset(now, self.ttl)?)
    }

    /// Give up leadership so a standby can take over on its next tick.
    pub fn resign(&self, now: DateTime<Utc>) -> Result<bool> {
        self.store.release_lock(&self.owner_id, now)
    }
}
