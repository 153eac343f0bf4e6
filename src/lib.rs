//! Fleetcron Library
//!
//! Interval job scheduling for a fleet of processes sharing one SQLite
//! database. Exposes the internal modules for the binaries and for testing.

pub mod admin;
pub mod background_jobs;
pub mod config;
pub mod coordination;
pub mod sqlite_persistence;
pub mod store;

// Re-export commonly used types for convenience
pub use admin::{JobAdmin, TriggerOutcome};
pub use background_jobs::{ActionRegistry, SchedulerLoop, WorkerLoop};
pub use config::{AppConfig, CliConfig, FileConfig};
pub use coordination::{JobQueue, JobRegistry, LeaderElection, QueueSettings};
pub use store::{CoordinationStore, SqliteCoordinationStore};
