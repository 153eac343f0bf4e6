//! SQLite helpers shared by the persisted stores.
//!
//! Schemas are declared as a list of [`VersionedSchema`]s; a database file is
//! created at the latest version, or validated and migrated forward when it
//! already exists.

mod versioned_schema;

pub use versioned_schema::*;

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How long a connection waits on a locked database before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) a database file shared between processes.
///
/// The connection is put in WAL mode with a busy timeout. Schema creation,
/// validation and migration all run inside a single IMMEDIATE transaction, so
/// several processes opening the same fresh file at once do not race.
pub fn open_versioned_database<P: AsRef<Path>>(
    db_path: P,
    schemas: &[VersionedSchema],
    label: &str,
) -> Result<Connection> {
    let db_path = db_path.as_ref();
    let mut conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open {} database at {:?}", label, db_path))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;

    let latest = schemas.last().context("No schemas defined")?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let table_count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table'",
        [],
        |row| row.get(0),
    )?;

    if table_count == 0 {
        latest.create(&tx)?;
        info!("Created new {} database at {:?}", label, db_path);
    } else {
        let db_version = tx
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;
        if db_version < 0 {
            bail!(
                "{} database version {} is too old, does not contain base db version {}",
                label,
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;
        if version >= schemas.len() {
            bail!(
                "{} database version {} is too new (max supported: {})",
                label,
                version,
                schemas.len() - 1
            );
        }

        schemas[version].validate(&tx)?;
        migrate_if_needed(&tx, schemas, version, label)?;
    }
    tx.commit()?;

    Ok(conn)
}

fn migrate_if_needed(
    conn: &Connection,
    schemas: &[VersionedSchema],
    current_version: usize,
    label: &str,
) -> Result<()> {
    let target_version = schemas.len() - 1;
    if current_version >= target_version {
        return Ok(());
    }

    info!(
        "Migrating {} database from version {} to {}",
        label, current_version, target_version
    );
    for schema in schemas.iter().skip(current_version + 1) {
        if let Some(migration_fn) = schema.migration {
            info!("Running {} migration to version {}", label, schema.version);
            migration_fn(conn)?;
        }
    }
    conn.execute(
        &format!("PRAGMA user_version = {}", BASE_DB_VERSION + target_version),
        [],
    )?;
    Ok(())
}
