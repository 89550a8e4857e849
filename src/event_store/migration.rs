//! Schema migrations
//!
//! Migrations are applied in order and the applied version is tracked in
//! `PRAGMA user_version`, so opening an existing database is idempotent.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StorageError};

/// Ordered list of schema migrations; index + 1 is the resulting version.
const MIGRATIONS: &[&str] = &[
    // v1: append-mostly event table with the filter columns indexed
    "CREATE TABLE IF NOT EXISTS events (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        source_app      TEXT    NOT NULL,
        session_id      TEXT    NOT NULL,
        hook_event_type TEXT    NOT NULL,
        payload         TEXT    NOT NULL,
        chat            TEXT,
        summary         TEXT,
        timestamp       TEXT    NOT NULL,
        timestamp_ms    INTEGER NOT NULL,
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NOT NULL
     );
     CREATE INDEX IF NOT EXISTS idx_events_source_app ON events(source_app);
     CREATE INDEX IF NOT EXISTS idx_events_session_id ON events(session_id);
     CREATE INDEX IF NOT EXISTS idx_events_hook_event_type ON events(hook_event_type);
     CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp_ms);
     CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);",
];

/// Latest schema version known to this build
pub fn latest_version() -> u32 {
    MIGRATIONS.len() as u32
}

/// Current schema version of a database
pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Apply every migration newer than the database's `user_version`.
///
/// Returns the number of migrations applied.
pub fn run_migrations(conn: &mut Connection) -> Result<usize> {
    let current = schema_version(conn)?;
    let latest = latest_version();
    if current > latest {
        return Err(StorageError::Migration {
            message: format!("database schema v{current} is newer than supported v{latest}"),
        }
        .into());
    }

    let mut applied = 0;
    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = index as u32 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql).map_err(|e| StorageError::Migration {
            message: format!("v{version:03} failed: {e}"),
        })?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!(version, "applied schema migration");
        applied += 1;
    }
    Ok(applied)
}
