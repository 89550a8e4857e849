//! REST API module for HTTP endpoints
//!
//! - `POST /events` - Ingest one event
//! - `GET /events` - Filtered, paginated listing
//! - `GET /events/recent` - Newest events
//! - `GET /events/:id` - Single event
//! - `GET /events/stats` - Aggregate counts
//! - `GET /events/filter-options` - Distinct filter values
//! - `POST /admin/vacuum`, `POST /admin/retention` - Maintenance

pub mod events;
pub mod maintenance;
pub mod stats;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::error::{Error, StorageError};

/// Standard list response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// Response data
    pub data: T,
    /// Total count (for paginated responses)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl<T> ApiResponse<T> {
    pub fn with_total(data: T, total: u64) -> Self {
        Self {
            data,
            total: Some(total),
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: "NOT_FOUND".to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: "BAD_REQUEST".to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: "INTERNAL_ERROR".to_string(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: "UNAVAILABLE".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Error::Validation(e) => (StatusCode::BAD_REQUEST, ApiError::bad_request(e.to_string())),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, ApiError::not_found(self.to_string())),
            Error::Storage(StorageError::Pool(e)) => {
                error!(error = %e, "connection pool exhausted");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiError::unavailable("storage temporarily unavailable"),
                )
            }
            Error::Storage(e) => {
                error!(error = %e, "storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::internal(e.to_string()),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// 400 response for request parts axum could not extract
pub(crate) fn rejection(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ApiError::bad_request(message))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn test_status_mapping() {
        let validation: Error = ValidationError::InvalidPayload.into();
        assert_eq!(validation.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::NotFound(1).into_response().status(), StatusCode::NOT_FOUND);
        let storage: Error = rusqlite::Error::InvalidQuery.into();
        assert_eq!(
            storage.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_total_is_omitted_when_absent() {
        let response = ApiResponse {
            data: vec![1, 2],
            total: None,
        };
        let json = serde_json::to_value(response).unwrap();
        assert_eq!(json, serde_json::json!({"data": [1, 2]}));
        let json = serde_json::to_value(ApiResponse::with_total(vec![1], 9)).unwrap();
        assert_eq!(json["total"], 9);
    }
}
