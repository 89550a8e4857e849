//! Error types for the event pipeline.
//!
//! Requests fail in one of two ways. A [`ValidationError`] is caused by the
//! client and is never retried by the service. A [`StorageError`] is caused
//! by the server, and the producer cannot tell whether the event was written,
//! so retrying is left to the caller. [`Error`] wraps both plus a not-found
//! case for point lookups.

use thiserror::Error;

/// Malformed or incomplete input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Body was not the expected JSON shape.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// A mandatory field was absent or blank.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// `hook_event_type` is not one of the six lifecycle stages.
    #[error("unknown hook_event_type '{0}'")]
    UnknownEventType(String),

    /// `payload` was present but not a JSON object.
    #[error("payload must be a JSON object")]
    InvalidPayload,

    /// A timestamp could not be read as ISO-8601.
    #[error("invalid timestamp '{0}': expected ISO-8601")]
    InvalidTimestamp(String),

    /// A maintenance or query parameter is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// I/O, pool or encoding failure in the store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error (exhausted or failed to connect).
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON column could not be encoded or decoded.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// A stored row does not decode into an event.
    #[error("corrupt row {id}: {message}")]
    Corrupt {
        /// Row id.
        id: i64,
        /// What was wrong with it.
        message: String,
    },

    /// Blocking task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(String),
}

/// Top-level error for store and service operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// No event with this id.
    #[error("event not found: {0}")]
    NotFound(i64),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(StorageError::Sqlite(e))
    }
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Error::Storage(StorageError::Pool(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(StorageError::Serde(e))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Storage(StorageError::Task(e.to_string()))
    }
}

/// Convenience alias for store and service results.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_display() {
        let err = ValidationError::MissingField("session_id");
        assert_eq!(err.to_string(), "missing required field 'session_id'");
    }

    #[test]
    fn validation_converts() {
        let err: Error = ValidationError::InvalidPayload.into();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(err.to_string(), "payload must be a JSON object");
    }

    #[test]
    fn sqlite_converts_to_storage() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, Error::Storage(StorageError::Sqlite(_))));
        assert!(err.to_string().contains("sqlite error"));
    }

    #[test]
    fn not_found_display() {
        assert_eq!(Error::NotFound(42).to_string(), "event not found: 42");
    }

    #[test]
    fn corrupt_row_display() {
        let err = StorageError::Corrupt {
            id: 3,
            message: "bad created_at".into(),
        };
        assert_eq!(err.to_string(), "corrupt row 3: bad created_at");
    }
}
