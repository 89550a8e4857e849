//! Aggregate endpoints

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};

use crate::api::websocket::AppState;

/// GET /events/stats - Totals and breakdowns
pub async fn get_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.service.stats().await.map(Json)
}

/// GET /events/filter-options - Distinct apps, event types and recent sessions
pub async fn get_filter_options(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.service.filter_options().await.map(Json)
}
