//! Aggregate statistics and filter choices
//!
//! Both reports run inside one read transaction so their numbers agree with
//! each other. Time windows are measured against the store's clock.

use std::collections::BTreeMap;

use rusqlite::Connection;

use super::store::EventStore;
use crate::error::Result;
use crate::types::{EventStats, FilterOptions};
use crate::utils::DAY_MS;

/// Sessions older than this drop out of the filter choices
const SESSION_WINDOW_DAYS: i64 = 7;

impl EventStore {
    /// Totals, last-24h count and per-type / per-app breakdowns
    pub fn stats(&self) -> Result<EventStats> {
        let since = self.clock.now_ms() - DAY_MS;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let total: i64 = tx.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        let last_24h: i64 = tx.query_row(
            "SELECT COUNT(*) FROM events WHERE created_at >= ?1",
            [since],
            |row| row.get(0),
        )?;
        let by_event_type = grouped_counts(&tx, "hook_event_type")?;
        let by_source_app = grouped_counts(&tx, "source_app")?;
        tx.commit()?;

        Ok(EventStats {
            total_events: total as u64,
            events_last_24h: last_24h as u64,
            by_event_type,
            by_source_app,
        })
    }

    /// Distinct apps and event types, plus sessions seen in the last week
    pub fn filter_options(&self) -> Result<FilterOptions> {
        let session_cutoff = self.clock.now_ms() - SESSION_WINDOW_DAYS * DAY_MS;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let source_apps = distinct(&tx, "source_app", None)?;
        let hook_event_types = distinct(&tx, "hook_event_type", None)?;
        let session_ids = distinct(&tx, "session_id", Some(session_cutoff))?;
        tx.commit()?;

        Ok(FilterOptions {
            source_apps,
            hook_event_types,
            session_ids,
        })
    }
}

// `column` is always one of our own literals, never caller input.
fn grouped_counts(conn: &Connection, column: &str) -> Result<BTreeMap<String, u64>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {column}, COUNT(*) FROM events GROUP BY {column}"
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
    })?;
    let mut counts = BTreeMap::new();
    for row in rows {
        let (key, count) = row?;
        counts.insert(key, count);
    }
    Ok(counts)
}

fn distinct(conn: &Connection, column: &str, created_since: Option<i64>) -> Result<Vec<String>> {
    let mut values = Vec::new();
    match created_since {
        Some(cutoff) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT {column} FROM events WHERE created_at >= ?1 ORDER BY {column}"
            ))?;
            for row in stmt.query_map([cutoff], |row| row.get::<_, String>(0))? {
                values.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT {column} FROM events ORDER BY {column}"
            ))?;
            for row in stmt.query_map([], |row| row.get::<_, String>(0))? {
                values.push(row?);
            }
        }
    }
    Ok(values)
}
