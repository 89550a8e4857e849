//! Ingestion and query service
//!
//! The async front door to the store. Store calls run on the blocking pool;
//! every successful insert is handed to the broadcast hub before the stored
//! event is returned to the producer.

use std::sync::Arc;

use tracing::{debug, info};

use crate::api::websocket::BroadcastHub;
use crate::error::{Error, Result};
use crate::event_store::EventStore;
use crate::types::{
    CandidateEvent, EventFilter, EventPage, EventStats, FilterOptions, NewEvent, Snapshot,
    StoredEvent, MAX_QUERY_LIMIT,
};
use crate::validation::{validate_candidate, validate_filter};

/// Events included in an observer's initial snapshot
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 50;

/// Store plus fan-out handle, shared by the HTTP and WebSocket surfaces
pub struct EventService {
    store: Arc<EventStore>,
    hub: Arc<BroadcastHub>,
    snapshot_limit: usize,
}

impl EventService {
    pub fn new(store: Arc<EventStore>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            store,
            hub,
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
        }
    }

    pub fn with_snapshot_limit(mut self, limit: usize) -> Self {
        self.snapshot_limit = limit.min(MAX_QUERY_LIMIT);
        self
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn snapshot_limit(&self) -> usize {
        self.snapshot_limit
    }

    /// Run a store operation on the blocking pool
    pub(crate) async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&EventStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store)).await?
    }

    /// Validate, persist and broadcast a producer's event
    pub async fn ingest(&self, candidate: CandidateEvent) -> Result<StoredEvent> {
        let event = validate_candidate(candidate)?;
        self.ingest_event(event).await
    }

    /// Persist and broadcast an already validated event
    pub async fn ingest_event(&self, event: NewEvent) -> Result<StoredEvent> {
        let stored = self.blocking(move |store| store.insert(&event)).await?;
        let report = self.hub.fan_out(&stored);
        info!(
            id = stored.id,
            source_app = %stored.source_app,
            event_type = %stored.event_type,
            observers = report.delivered,
            "event ingested"
        );
        Ok(stored)
    }

    pub async fn get(&self, id: i64) -> Result<StoredEvent> {
        self.blocking(move |store| store.get_by_id(id))
            .await?
            .ok_or(Error::NotFound(id))
    }

    /// One page of matches plus the total count
    pub async fn query(&self, filter: EventFilter) -> Result<EventPage> {
        validate_filter(&filter)?;
        let page = self.blocking(move |store| store.page(&filter)).await?;
        debug!(returned = page.events.len(), total = page.total, "query");
        Ok(page)
    }

    /// Newest `n` events, capped at the page limit
    pub async fn recent(&self, n: usize) -> Result<Vec<StoredEvent>> {
        let n = n.min(MAX_QUERY_LIMIT);
        self.blocking(move |store| store.recent(n)).await
    }

    pub async fn stats(&self) -> Result<EventStats> {
        self.blocking(|store| store.stats()).await
    }

    pub async fn filter_options(&self) -> Result<FilterOptions> {
        self.blocking(|store| store.filter_options()).await
    }

    /// Recent events and stats for an observer's initial view
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let n = self.snapshot_limit;
        self.blocking(move |store| {
            Ok(Snapshot {
                events: store.recent(n)?,
                stats: store.stats()?,
            })
        })
        .await
    }
}
