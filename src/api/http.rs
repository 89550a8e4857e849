//! HTTP server setup with Axum

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::rest::{events, maintenance, stats};
use super::websocket::{handler::ws_handler, AppState};

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    // Producers and dashboards run on other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // WebSocket endpoint
        .route("/stream", get(ws_handler))
        // Health check
        .route("/health", get(health_check))
        // Ingestion and queries
        .route("/events", post(events::create_event).get(events::list_events))
        .route("/events/recent", get(events::recent_events))
        .route("/events/stats", get(stats::get_stats))
        .route("/events/filter-options", get(stats::get_filter_options))
        .route("/events/:id", get(events::get_event))
        // Maintenance
        .route("/admin/vacuum", post(maintenance::vacuum))
        .route("/admin/retention", post(maintenance::retention))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::websocket::BroadcastHub;
    use crate::event_store::{ConnectionConfig, EventStore};
    use crate::ingest::EventService;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            EventStore::open(dir.path().join("events.db"), &ConnectionConfig::default()).unwrap();
        let service = EventService::new(Arc::new(store), Arc::new(BroadcastHub::default()));
        let app = create_router(Arc::new(AppState::new(Arc::new(service))));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
    }
}
