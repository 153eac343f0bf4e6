//! Database schema for the coordination database.
//!
//! All timestamps are stored as Unix epoch milliseconds.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, PartialUniqueIndex, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 0
// =============================================================================

const JOBS_TABLE_V0: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("interval_seconds", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "paused",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("last_run_time", &SqlType::Integer),
        sqlite_column!("next_run_time", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    partial_unique_indices: &[],
};

/// Execution requests. Terminal rows are kept for audit.
const JOB_QUEUE_TABLE_V0: Table = Table {
    name: "job_queue",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "attempts",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("worker_id", &SqlType::Text),
        sqlite_column!("enqueued_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("lease_expires_at", &SqlType::Integer),
        sqlite_column!("executed_at", &SqlType::Integer),
        sqlite_column!("last_error", &SqlType::Text),
    ],
    indices: &[
        ("idx_job_queue_status_enqueued", "status, enqueued_at, id"),
        ("idx_job_queue_job_id", "job_id"),
        ("idx_job_queue_lease", "status, lease_expires_at"),
    ],
    partial_unique_indices: &[PartialUniqueIndex {
        name: "uidx_job_queue_active_job",
        columns: "job_id",
        predicate: "status IN ('pending', 'in_progress')",
    }],
};

const LEADER_LOCK_TABLE_V0: Table = Table {
    name: "leader_lock",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("owner_id", &SqlType::Text, non_null = true),
        sqlite_column!("locked_at", &SqlType::Integer, non_null = true),
        sqlite_column!("expires_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    partial_unique_indices: &[],
};

pub const COORDINATION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[JOBS_TABLE_V0, JOB_QUEUE_TABLE_V0, LEADER_LOCK_TABLE_V0],
    migration: None,
}];
