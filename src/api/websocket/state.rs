//! Shared application state

use std::sync::Arc;

use super::hub::BroadcastHub;
use crate::ingest::EventService;

/// State handed to every HTTP and WebSocket handler
pub struct AppState {
    pub service: Arc<EventService>,
    pub hub: Arc<BroadcastHub>,
}

impl AppState {
    pub fn new(service: Arc<EventService>) -> Self {
        let hub = Arc::clone(service.hub());
        Self { service, hub }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{ConnectionConfig, EventStore};

    #[test]
    fn test_state_shares_the_service_hub() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            EventStore::open(dir.path().join("events.db"), &ConnectionConfig::default()).unwrap();
        let hub = Arc::new(BroadcastHub::default());
        let service = Arc::new(EventService::new(Arc::new(store), Arc::clone(&hub)));

        let state = AppState::new(service);
        assert!(Arc::ptr_eq(&state.hub, &hub));
    }
}
