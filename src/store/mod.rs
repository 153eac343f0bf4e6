//! Persisted coordination state shared by schedulers and workers.

mod models;
mod schema;
mod store;
mod trait_def;

pub use models::{
    DeleteJobOutcome, JobDefinition, LeaderLock, QueueEntry, QueueFilter, QueueStats,
    QueueStatus, LEADER_LOCK_ID, MAX_INTERVAL_SECONDS,
};
pub use store::SqliteCoordinationStore;
pub use trait_def::{CoordinationStore, JobDefinitionStore, JobQueueStore, LeaderLockStore};
