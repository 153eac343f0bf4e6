//! SQLite-backed coordination store.

use super::models::*;
use super::schema::COORDINATION_VERSIONED_SCHEMAS;
use super::trait_def::{JobDefinitionStore, JobQueueStore, LeaderLockStore};
use crate::sqlite_persistence::open_versioned_database;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, ToSql, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const ACTIVE_STATUSES: &str = "('pending', 'in_progress')";

/// SQLite-backed store for jobs, the queue, and the leader lock.
///
/// Each instance owns one connection. Separate processes (or separate
/// instances in tests) coordinate only through the database file.
pub struct SqliteCoordinationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCoordinationStore {
    /// Open an existing database or create a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_database(db_path, COORDINATION_VERSIONED_SCHEMAS, "coordination")?;
        Ok(SqliteCoordinationStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("coordination store connection mutex poisoned"))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobDefinition> {
        Ok(JobDefinition {
            id: row.get("id")?,
            interval_seconds: row.get("interval_seconds")?,
            paused: row.get::<_, i64>("paused")? != 0,
            last_run_time: row.get::<_, Option<i64>>("last_run_time")?.map(from_millis),
            next_run_time: row.get::<_, Option<i64>>("next_run_time")?.map(from_millis),
            created_at: from_millis(row.get("created_at")?),
        })
    }

    fn row_to_queue_entry(row: &rusqlite::Row) -> rusqlite::Result<QueueEntry> {
        let status: String = row.get("status")?;
        Ok(QueueEntry {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            status: QueueStatus::from_db_str(&status).ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(
                    0,
                    format!("status '{}'", status),
                    rusqlite::types::Type::Text,
                )
            })?,
            attempts: row.get("attempts")?,
            worker_id: row.get("worker_id")?,
            enqueued_at: from_millis(row.get("enqueued_at")?),
            started_at: row.get::<_, Option<i64>>("started_at")?.map(from_millis),
            lease_expires_at: row.get::<_, Option<i64>>("lease_expires_at")?.map(from_millis),
            executed_at: row.get::<_, Option<i64>>("executed_at")?.map(from_millis),
            last_error: row.get("last_error")?,
        })
    }
}

impl JobDefinitionStore for SqliteCoordinationStore {
    fn add_job(&self, id: &str, interval_seconds: i64, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO jobs (id, interval_seconds, paused, created_at) VALUES (?1, ?2, 0, ?3)",
            params![id, interval_seconds, to_millis(now)],
        )?;
        Ok(inserted == 1)
    }

    fn get_job(&self, id: &str) -> Result<Option<JobDefinition>> {
        let conn = self.conn()?;
        let job = conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", [id], Self::row_to_job)
            .optional()?;
        Ok(job)
    }

    fn list_jobs(&self) -> Result<Vec<JobDefinition>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY id ASC")?;
        let jobs = stmt
            .query_map([], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn set_paused(&self, id: &str, paused: bool) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE jobs SET paused = ?1 WHERE id = ?2",
            params![paused as i64, id],
        )?;
        Ok(updated == 1)
    }

    fn set_next_run_time(&self, id: &str, next_run_time: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE jobs SET next_run_time = ?1 WHERE id = ?2",
            params![to_millis(next_run_time), id],
        )?;
        Ok(updated == 1)
    }

    fn set_last_run_time(&self, id: &str, last_run_time: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE jobs SET last_run_time = ?1 WHERE id = ?2",
            params![to_millis(last_run_time), id],
        )?;
        Ok(updated == 1)
    }

    fn delete_job(&self, id: &str) -> Result<DeleteJobOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let in_progress: i64 = tx.query_row(
            "SELECT COUNT(*) FROM job_queue WHERE job_id = ?1 AND status = 'in_progress'",
            [id],
            |row| row.get(0),
        )?;
        if in_progress > 0 {
            return Ok(DeleteJobOutcome::InProgress);
        }

        let purged_pending = tx.execute(
            "DELETE FROM job_queue WHERE job_id = ?1 AND status = 'pending'",
            [id],
        )?;
        let deleted = tx.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        tx.commit()?;

        if deleted == 0 {
            Ok(DeleteJobOutcome::NotFound)
        } else {
            Ok(DeleteJobOutcome::Deleted { purged_pending })
        }
    }
}

impl JobQueueStore for SqliteCoordinationStore {
    // === Admission ===

    fn enqueue(&self, job_id: &str, now: DateTime<Utc>) -> Result<Option<i64>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            &format!(
                r#"INSERT INTO job_queue (job_id, status, attempts, enqueued_at)
                   SELECT ?1, 'pending', 0, ?2
                   WHERE EXISTS (SELECT 1 FROM jobs WHERE id = ?1)
                     AND NOT EXISTS (
                         SELECT 1 FROM job_queue WHERE job_id = ?1 AND status IN {}
                     )"#,
                ACTIVE_STATUSES
            ),
            params![job_id, to_millis(now)],
        )?;
        let entry_id = (inserted == 1).then(|| tx.last_insert_rowid());
        tx.commit()?;
        Ok(entry_id)
    }

    // === State Transitions (atomic) ===

    fn pending_candidates(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT * FROM job_queue
               WHERE status = 'pending'
               ORDER BY enqueued_at ASC, id ASC
               LIMIT ?1"#,
        )?;
        let entries = stmt
            .query_map([limit as i64], Self::row_to_queue_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn try_claim(
        &self,
        entry_id: i64,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"UPDATE job_queue
               SET status = 'in_progress', worker_id = ?1, started_at = ?2, lease_expires_at = ?3
               WHERE id = ?4 AND status = 'pending'"#,
            params![worker_id, to_millis(now), to_millis(lease_expires_at), entry_id],
        )?;
        Ok(updated == 1)
    }

    fn renew_lease(
        &self,
        entry_id: i64,
        worker_id: &str,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"UPDATE job_queue SET lease_expires_at = ?1
               WHERE id = ?2 AND status = 'in_progress' AND worker_id = ?3"#,
            params![to_millis(lease_expires_at), entry_id, worker_id],
        )?;
        Ok(updated == 1)
    }

    fn mark_done(&self, entry_id: i64, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"UPDATE job_queue
               SET status = 'done', executed_at = ?1, lease_expires_at = NULL
               WHERE id = ?2 AND status = 'in_progress' AND worker_id = ?3"#,
            params![to_millis(now), entry_id, worker_id],
        )?;
        Ok(updated == 1)
    }

    fn mark_failed(
        &self,
        entry_id: i64,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"UPDATE job_queue
               SET status = 'failed', last_error = ?1, executed_at = ?2, lease_expires_at = NULL
               WHERE id = ?3 AND status = 'in_progress' AND worker_id = ?4"#,
            params![error, to_millis(now), entry_id, worker_id],
        )?;
        Ok(updated == 1)
    }

    // === Reclamation ===

    fn expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<QueueEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT * FROM job_queue
               WHERE status = 'in_progress' AND lease_expires_at < ?1
               ORDER BY id ASC"#,
        )?;
        let entries = stmt
            .query_map([to_millis(now)], Self::row_to_queue_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn requeue_expired(
        &self,
        entry_id: i64,
        observed_attempts: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"UPDATE job_queue
               SET status = 'pending', attempts = attempts + 1,
                   worker_id = NULL, started_at = NULL, lease_expires_at = NULL
               WHERE id = ?1 AND status = 'in_progress'
                 AND lease_expires_at < ?2 AND attempts = ?3"#,
            params![entry_id, to_millis(now), observed_attempts],
        )?;
        Ok(updated == 1)
    }

    fn fail_expired(
        &self,
        entry_id: i64,
        observed_attempts: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"UPDATE job_queue
               SET status = 'failed', last_error = ?1, lease_expires_at = NULL
               WHERE id = ?2 AND status = 'in_progress'
                 AND lease_expires_at < ?3 AND attempts = ?4"#,
            params![error, entry_id, to_millis(now), observed_attempts],
        )?;
        Ok(updated == 1)
    }

    // === Inspection ===

    fn get_entry(&self, entry_id: i64) -> Result<Option<QueueEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                "SELECT * FROM job_queue WHERE id = ?1",
                [entry_id],
                Self::row_to_queue_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn list_entries(&self, filter: &QueueFilter, limit: usize) -> Result<Vec<QueueEntry>> {
        let conn = self.conn()?;

        let mut conditions: Vec<&str> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_db_str()));
        }
        if let Some(job_id) = &filter.job_id {
            conditions.push("job_id = ?");
            params.push(Box::new(job_id.clone()));
        }
        params.push(Box::new(limit as i64));

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT * FROM job_queue {} ORDER BY id DESC LIMIT ?",
            where_clause
        );

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let entries = stmt
            .query_map(params_refs.as_slice(), Self::row_to_queue_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn queue_stats(&self) -> Result<QueueStats> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM job_queue GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            let count = count as usize;
            match QueueStatus::from_db_str(&status) {
                Some(QueueStatus::Pending) => stats.pending = count,
                Some(QueueStatus::InProgress) => stats.in_progress = count,
                Some(QueueStatus::Done) => stats.done = count,
                Some(QueueStatus::Failed) => stats.failed = count,
                None => {}
            }
        }
        Ok(stats)
    }

    fn prune_terminal_entries(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM job_queue WHERE status IN ('done', 'failed') AND enqueued_at < ?1",
            [to_millis(older_than)],
        )?;
        Ok(deleted)
    }
}

impl LeaderLockStore for SqliteCoordinationStore {
    fn create_lock_if_absent(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO leader_lock (id, owner_id, locked_at, expires_at)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![LEADER_LOCK_ID, owner_id, to_millis(now), to_millis(expires_at)],
        )?;
        Ok(inserted == 1)
    }

    fn take_over_lock(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"UPDATE leader_lock
               SET owner_id = ?1, locked_at = ?2, expires_at = ?3
               WHERE id = ?4 AND (expires_at <= ?2 OR owner_id = ?1)"#,
            params![owner_id, to_millis(now), to_millis(expires_at), LEADER_LOCK_ID],
        )?;
        Ok(updated == 1)
    }

    fn extend_lock(&self, owner_id: &str, expires_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE leader_lock SET expires_at = ?1 WHERE id = ?2 AND owner_id = ?3",
            params![to_millis(expires_at), LEADER_LOCK_ID, owner_id],
        )?;
        Ok(updated == 1)
    }

    fn release_lock(&self, owner_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE leader_lock SET expires_at = ?1 WHERE id = ?2 AND owner_id = ?3",
            params![to_millis(now), LEADER_LOCK_ID, owner_id],
        )?;
        Ok(updated == 1)
    }

    fn get_lock(&self) -> Result<Option<LeaderLock>> {
        let conn = self.conn()?;
        let lock = conn
            .query_row(
                "SELECT owner_id, locked_at, expires_at FROM leader_lock WHERE id = ?1",
                [LEADER_LOCK_ID],
                |row| {
                    Ok(LeaderLock {
                        owner_id: row.get("owner_id")?,
                        locked_at: from_millis(row.get("locked_at")?),
                        expires_at: from_millis(row.get("expires_at")?),
                    })
                },
            )
            .optional()?;
        Ok(lock)
    }
}
