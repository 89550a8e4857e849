//! Event Store Module
//!
//! Durable storage for hook events:
//! - `EventStore`: insert, point lookup, filtered queries
//! - stats: aggregate counts and filter choices
//! - retention: age-based sweep and vacuum
//! - `connection` / `migration`: WAL connection pool and schema versions
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//! ┌──────────┐    ┌────────────┐    ┌──────────────────┐    ┌─────────────┐
//! │ producer │───►│ validation │───►│ IMMEDIATE tx     │───►│ StoredEvent │
//! │ request  │    │            │    │ INSERT RETURNING │    │ (id, times) │
//! └──────────┘    └────────────┘    └──────────────────┘    └─────────────┘
//!
//! Read Path:
//! ┌──────────────┐    ┌──────────────────┐
//! │ EventFilter  │───►│ indexed SELECT   │───► newest first
//! │ (validated)  │    │ on a WAL reader  │
//! └──────────────┘    └──────────────────┘
//! ```

mod connection;
mod migration;
mod retention;
mod stats;
mod store;

pub use connection::{journal_mode, open_pool, ConnectionConfig, ConnectionPool, PooledConnection};
pub use migration::{latest_version, run_migrations, schema_version};
pub use store::EventStore;
