//! Retention sweep and storage compaction
//!
//! Events are only ever removed in bulk by age. Age is measured on the
//! store-assigned `created_at`, never on the producer's timestamp.

use tracing::info;

use super::store::EventStore;
use crate::error::{Result, ValidationError};
use crate::utils::DAY_MS;

impl EventStore {
    /// Delete events created more than `older_than_days` days ago.
    ///
    /// Returns how many rows were removed. Running it twice with nothing
    /// inserted in between deletes nothing the second time.
    pub fn retention_sweep(&self, older_than_days: u32) -> Result<usize> {
        if older_than_days == 0 {
            return Err(ValidationError::InvalidParameter(
                "retention days must be at least 1".into(),
            )
            .into());
        }
        let cutoff = self.clock.now_ms() - i64::from(older_than_days) * DAY_MS;
        self.retention_sweep_before(cutoff)
    }

    /// Delete events whose `created_at` is strictly before `cutoff_ms`
    pub fn retention_sweep_before(&self, cutoff_ms: i64) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM events WHERE created_at < ?1", [cutoff_ms])?;
        if deleted > 0 {
            info!(deleted, cutoff_ms, "retention sweep removed events");
        }
        Ok(deleted)
    }

    /// Checkpoint the WAL and rebuild the database file
    ///
    /// Takes the write lock for the duration, so ingestion stalls until it
    /// finishes.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        conn.execute_batch("VACUUM")?;
        info!(path = %self.path().display(), "database vacuumed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Map;

    use crate::error::Error;
    use crate::event_store::ConnectionConfig;
    use crate::types::{EventFilter, HookEventType, NewEvent};
    use crate::utils::{Clock, ManualClock};

    use super::*;

    fn store_at(dir: &tempfile::TempDir, now_ms: i64) -> (EventStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now_ms));
        let store = EventStore::with_clock(
            dir.path().join("events.db"),
            &ConnectionConfig::default(),
            clock.clone(),
        )
        .unwrap();
        (store, clock)
    }

    fn insert(store: &EventStore) {
        store
            .insert(&NewEvent::new("app", "s", HookEventType::Stop, Map::new()))
            .unwrap();
    }

    #[test]
    fn test_sweep_removes_only_old_events() {
        let dir = tempfile::tempdir().unwrap();
        let (store, clock) = store_at(&dir, 100 * DAY_MS);

        insert(&store);
        insert(&store);
        clock.advance(10 * DAY_MS);
        insert(&store);

        assert_eq!(store.retention_sweep(5).unwrap(), 2);
        assert_eq!(store.count(&EventFilter::new()).unwrap(), 1);
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (store, clock) = store_at(&dir, 100 * DAY_MS);
        insert(&store);
        clock.advance(3 * DAY_MS);

        let cutoff = clock.now_ms() - DAY_MS;
        assert_eq!(store.retention_sweep_before(cutoff).unwrap(), 1);
        assert_eq!(store.retention_sweep_before(cutoff).unwrap(), 0);
    }

    #[test]
    fn test_ids_not_reused_after_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let (store, clock) = store_at(&dir, 100 * DAY_MS);
        insert(&store);
        let last = store.recent(1).unwrap()[0].id;
        clock.advance(2 * DAY_MS);
        store.retention_sweep(1).unwrap();

        let next = store
            .insert(&NewEvent::new("app", "s", HookEventType::Stop, Map::new()))
            .unwrap();
        assert!(next.id > last);
    }

    #[test]
    fn test_zero_days_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_at(&dir, 100 * DAY_MS);
        assert!(matches!(
            store.retention_sweep(0),
            Err(Error::Validation(ValidationError::InvalidParameter(_)))
        ));
    }

    #[test]
    fn test_vacuum_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_at(&dir, 100 * DAY_MS);
        insert(&store);
        store.vacuum().unwrap();
        assert_eq!(store.count(&EventFilter::new()).unwrap(), 1);
    }
}
