//! Administrative endpoints
//!
//! Both operations run on the blocking pool and may take a while on a large
//! database; they are meant to be called out of band.

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::rejection;
use crate::api::websocket::AppState;

#[derive(Debug, Serialize)]
pub struct VacuumResponse {
    pub status: &'static str,
}

/// POST /admin/vacuum
pub async fn vacuum(State(state): State<Arc<AppState>>) -> Response {
    match state.service.vacuum().await {
        Ok(()) => Json(VacuumResponse { status: "ok" }).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct RetentionParams {
    pub days: u32,
}

#[derive(Debug, Serialize)]
pub struct RetentionResponse {
    pub deleted: usize,
    pub older_than_days: u32,
}

/// POST /admin/retention?days=N
pub async fn retention(
    State(state): State<Arc<AppState>>,
    params: Result<Query<RetentionParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(e) => return rejection(e.body_text()),
    };
    match state.service.retention_sweep(params.days).await {
        Ok(deleted) => {
            info!(deleted, days = params.days, "manual retention sweep");
            Json(RetentionResponse {
                deleted,
                older_than_days: params.days,
            })
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}
