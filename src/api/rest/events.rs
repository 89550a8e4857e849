//! Event endpoints

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use super::{rejection, ApiResponse};
use crate::api::websocket::AppState;
use crate::error::{Error, ValidationError};
use crate::ingest::DEFAULT_SNAPSHOT_LIMIT;
use crate::types::{CandidateEvent, EventFilter};

/// POST /events - Validate, store and broadcast one event
///
/// The body is parsed by hand so that a malformed document gets the same
/// JSON error shape as a failed validation.
pub async fn create_event(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let candidate: CandidateEvent = match serde_json::from_slice(&body) {
        Ok(candidate) => candidate,
        Err(e) => return Error::from(ValidationError::Malformed(e.to_string())).into_response(),
    };
    match state.service.ingest(candidate).await {
        Ok(stored) => Json(stored).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /events - Filtered listing, newest first
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    filter: Result<Query<EventFilter>, QueryRejection>,
) -> Response {
    let Query(filter) = match filter {
        Ok(filter) => filter,
        Err(e) => return rejection(e.body_text()),
    };
    match state.service.query(filter).await {
        Ok(page) => Json(ApiResponse::with_total(page.events, page.total)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Query parameters for the recent listing
#[derive(Debug, Deserialize)]
pub struct RecentParams {
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
}

fn default_recent_limit() -> usize {
    DEFAULT_SNAPSHOT_LIMIT
}

/// GET /events/recent - Newest events
pub async fn recent_events(
    State(state): State<Arc<AppState>>,
    params: Result<Query<RecentParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(e) => return rejection(e.body_text()),
    };
    match state.service.recent(params.limit).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /events/:id - Single event
pub async fn get_event(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> Response {
    let Path(id) = match id {
        Ok(id) => id,
        Err(e) => return rejection(e.body_text()),
    };
    state.service.get(id).await.map(Json).into_response()
}
