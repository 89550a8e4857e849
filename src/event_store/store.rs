//! Event Store - durable, concurrent-safe event log
//!
//! Events live in a single SQLite table. Writers serialize on SQLite's write
//! lock inside an `IMMEDIATE` transaction; readers run against the WAL
//! without waiting on them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Row, TransactionBehavior};
use tracing::debug;

use super::connection::{open_pool, ConnectionConfig, ConnectionPool, PooledConnection};
use super::migration::run_migrations;
use crate::error::{Result, StorageError};
use crate::types::{ChatMessage, EventFilter, EventPage, HookEventType, NewEvent, StoredEvent};
use crate::utils::{from_millis, parse_timestamp_ms, Clock, SystemClock};
use crate::validation::{validate_filter, validate_new_event};

pub(super) const EVENT_COLUMNS: &str = "id, source_app, session_id, hook_event_type, payload, \
     chat, summary, timestamp, created_at, updated_at";

/// Handle to the event database
///
/// Cheap to share behind an `Arc`; every operation checks a connection out of
/// the pool and returns it when done. All methods block and belong on a
/// blocking thread when called from async code.
pub struct EventStore {
    path: PathBuf,
    pub(super) pool: ConnectionPool,
    pub(super) clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("path", &self.path)
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

impl EventStore {
    /// Open (or create) the database at `path` and bring its schema up to date
    pub fn open<P: AsRef<Path>>(path: P, config: &ConnectionConfig) -> Result<Self> {
        Self::with_clock(path, config, Arc::new(SystemClock))
    }

    /// Open with an explicit time source
    pub fn with_clock<P: AsRef<Path>>(
        path: P,
        config: &ConnectionConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pool = open_pool(&path, config)?;
        {
            let mut conn = pool.get()?;
            let applied = run_migrations(&mut conn)?;
            debug!(path = %path.display(), applied, "event store ready");
        }
        Ok(Self { path, pool, clock })
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Persist a validated event and return it with its store-assigned fields.
    ///
    /// `created_at` is clamped to the newest existing row inside the write
    /// transaction, so it never decreases as `id` grows even if the wall
    /// clock steps backwards.
    pub fn insert(&self, event: &NewEvent) -> Result<StoredEvent> {
        validate_new_event(event)?;

        let payload = serde_json::to_string(&event.payload)?;
        let chat = event.chat.as_ref().map(serde_json::to_string).transpose()?;
        let now = self.clock.now_ms();

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (id, created_at): (i64, i64) = tx.query_row(
            "INSERT INTO events (source_app, session_id, hook_event_type, payload, chat,
                                 summary, timestamp, timestamp_ms, created_at, updated_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, t.at, t.at
             FROM (SELECT MAX(?9, COALESCE((SELECT MAX(created_at) FROM events), 0)) AS at) t
             RETURNING id, created_at",
            params![
                event.source_app,
                event.session_id,
                event.event_type.as_str(),
                payload,
                chat,
                event.summary,
                event.timestamp,
                event.timestamp_ms,
                now,
            ],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        tx.commit()?;

        let created_at = millis_to_datetime(id, created_at)?;
        debug!(id, source_app = %event.source_app, event_type = %event.event_type, "event stored");
        Ok(StoredEvent {
            id,
            source_app: event.source_app.clone(),
            session_id: event.session_id.clone(),
            event_type: event.event_type,
            payload: event.payload.clone(),
            chat: event.chat.clone(),
            summary: event.summary.clone(),
            timestamp: event.timestamp.clone(),
            created_at,
            updated_at: created_at,
        })
    }

    /// Point lookup by id
    pub fn get_by_id(&self, id: i64) -> Result<Option<StoredEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map([id], EventRow::from_row)?;
        let first = rows.next();
        match first {
            Some(row) => Ok(Some(row?.into_stored()?)),
            None => Ok(None),
        }
    }

    /// Events matching `filter`, newest first, paginated
    pub fn query(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>> {
        validate_filter(filter)?;
        let conn = self.conn()?;
        select_page(&conn, filter)
    }

    /// Number of events matching `filter`, ignoring `limit` and `offset`
    pub fn count(&self, filter: &EventFilter) -> Result<u64> {
        validate_filter(filter)?;
        let conn = self.conn()?;
        count_matches(&conn, filter)
    }

    /// One page plus the total match count, read in a single transaction
    ///
    /// The two reads agree with each other, but successive pages may still
    /// shift when events arrive between requests.
    pub fn page(&self, filter: &EventFilter) -> Result<EventPage> {
        validate_filter(filter)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let events = select_page(&tx, filter)?;
        let total = count_matches(&tx, filter)?;
        tx.commit()?;
        Ok(EventPage { events, total })
    }

    /// The `n` most recently created events, newest first
    pub fn recent(&self, n: usize) -> Result<Vec<StoredEvent>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {EVENT_COLUMNS} FROM events ORDER BY created_at DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([sql_int(n)], EventRow::from_row)?;
        collect_events(rows)
    }
}

/// Raw column values of one `events` row
struct EventRow {
    id: i64,
    source_app: String,
    session_id: String,
    event_type: String,
    payload: String,
    chat: Option<String>,
    summary: Option<String>,
    timestamp: String,
    created_at: i64,
    updated_at: i64,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_app: row.get(1)?,
            session_id: row.get(2)?,
            event_type: row.get(3)?,
            payload: row.get(4)?,
            chat: row.get(5)?,
            summary: row.get(6)?,
            timestamp: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_stored(self) -> Result<StoredEvent> {
        let id = self.id;
        let corrupt = |message: String| StorageError::Corrupt { id, message };

        let event_type: HookEventType = self
            .event_type
            .parse()
            .map_err(|e: crate::types::UnknownEventType| corrupt(e.to_string()))?;
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| corrupt(format!("payload: {e}")))?;
        let chat = self
            .chat
            .map(|raw| serde_json::from_str::<Vec<ChatMessage>>(&raw))
            .transpose()
            .map_err(|e| corrupt(format!("chat: {e}")))?;

        Ok(StoredEvent {
            id,
            source_app: self.source_app,
            session_id: self.session_id,
            event_type,
            payload,
            chat,
            summary: self.summary,
            timestamp: self.timestamp,
            created_at: millis_to_datetime(id, self.created_at)?,
            updated_at: millis_to_datetime(id, self.updated_at)?,
        })
    }
}

fn millis_to_datetime(id: i64, ms: i64) -> Result<chrono::DateTime<chrono::Utc>> {
    from_millis(ms).ok_or_else(|| {
        StorageError::Corrupt {
            id,
            message: format!("timestamp {ms} out of range"),
        }
        .into()
    })
}

fn collect_events<I>(rows: I) -> Result<Vec<StoredEvent>>
where
    I: Iterator<Item = rusqlite::Result<EventRow>>,
{
    rows.map(|row| row?.into_stored()).collect()
}

/// SQLite integers are signed; larger counts saturate
fn sql_int(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Escape `LIKE` wildcards so the search term matches literally.
///
/// `LIKE` still folds ASCII case, so `Cargo` matches `cargo`.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// WHERE clause and bound values for a filter (pagination excluded)
fn where_clause(filter: &EventFilter) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    let mut equals = |column: &str, value: &Option<String>| {
        if let Some(v) = value {
            values.push(SqlValue::Text(v.clone()));
            clauses.push(format!("{column} = ?{}", values.len()));
        }
    };
    equals("source_app", &filter.source_app);
    equals("session_id", &filter.session_id);
    equals("hook_event_type", &filter.event_type);

    if let Some(since) = filter.since.as_deref().and_then(parse_timestamp_ms) {
        values.push(SqlValue::Integer(since));
        clauses.push(format!("timestamp_ms >= ?{}", values.len()));
    }
    if let Some(until) = filter.until.as_deref().and_then(parse_timestamp_ms) {
        values.push(SqlValue::Integer(until));
        clauses.push(format!("timestamp_ms <= ?{}", values.len()));
    }
    if let Some(term) = filter.search.as_deref().filter(|t| !t.is_empty()) {
        values.push(SqlValue::Text(escape_like(term)));
        let n = values.len();
        clauses.push(format!(
            "(payload LIKE ?{n} ESCAPE '\\' OR summary LIKE ?{n} ESCAPE '\\')"
        ));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

fn select_page(conn: &rusqlite::Connection, filter: &EventFilter) -> Result<Vec<StoredEvent>> {
    let (clause, mut values) = where_clause(filter);
    values.push(SqlValue::Integer(sql_int(filter.normalized_limit())));
    let limit_idx = values.len();
    values.push(SqlValue::Integer(sql_int(filter.normalized_offset())));
    let offset_idx = values.len();

    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events{clause} \
         ORDER BY created_at DESC, id DESC LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), EventRow::from_row)?;
    collect_events(rows)
}

fn count_matches(conn: &rusqlite::Connection, filter: &EventFilter) -> Result<u64> {
    let (clause, values) = where_clause(filter);
    let sql = format!("SELECT COUNT(*) FROM events{clause}");
    let total: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
    Ok(total as u64)
}
