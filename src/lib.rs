//! Hookwatch - agent lifecycle event pipeline
//!
//! Ingests hook events emitted by concurrently running coding agents, stores
//! them durably in SQLite and streams them to observers over WebSocket.
//!
//! # Features
//!
//! - **Durable store**: WAL-mode SQLite behind a connection pool, monotonic ids
//! - **REST ingestion**: validated `POST /events` plus filtered queries and stats
//! - **Realtime hub**: non-blocking fan-out with per-observer backpressure
//! - **Resilient client**: reconnecting connector with an outbox and heartbeat
//!
//! # Modules
//!
//! - `types`: Event records, filters and aggregate shapes
//! - `validation`: Producer input and filter checks
//! - `event_store`: SQLite-backed event log
//! - `ingest`: Async service tying the store to the hub
//! - `protocol`: Realtime wire messages
//! - `api`: Axum router, REST handlers and the WebSocket hub
//! - `client`: Reconnecting realtime client
//! - `config`: Server settings
//! - `utils`: Timestamps and the injectable clock
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hookwatch::api::websocket::{AppState, BroadcastHub};
//! use hookwatch::event_store::{ConnectionConfig, EventStore};
//! use hookwatch::ingest::EventService;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = EventStore::open("events.db", &ConnectionConfig::default())?;
//!     let hub = Arc::new(BroadcastHub::default());
//!     let service = Arc::new(EventService::new(Arc::new(store), hub));
//!     let app = hookwatch::api::create_router(Arc::new(AppState::new(service)));
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:4000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod event_store;
pub mod ingest;
pub mod protocol;
pub mod types;
pub mod utils;
pub mod validation;

// Re-export commonly used items at crate root
pub use api::websocket::{AppState, BroadcastHub};
pub use client::{ConnectionState, Connector, ConnectorConfig};
pub use config::ServerConfig;
pub use error::{Error, Result, StorageError, ValidationError};
pub use event_store::EventStore;
pub use ingest::EventService;
pub use protocol::{ClientMessage, ServerMessage};
pub use types::{
    CandidateEvent, ChatMessage, EventFilter, EventPage, EventStats, FilterOptions,
    HookEventType, NewEvent, Snapshot, StoredEvent,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
