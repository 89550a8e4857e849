//! Ingestion & Query Service
//!
//! Producers and observers reach the store only through [`EventService`].

mod maintenance;
mod service;

pub use maintenance::spawn_retention_task;
pub use service::{EventService, DEFAULT_SNAPSHOT_LIMIT};
