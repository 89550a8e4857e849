//! Server configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::websocket::DEFAULT_SESSION_BUFFER;
use crate::event_store::ConnectionConfig;
use crate::ingest::DEFAULT_SNAPSHOT_LIMIT;

/// Settings for the `hookwatch-server` process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `4000`, where hook senders post by default).
    pub port: u16,
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Events in an observer's initial snapshot.
    pub snapshot_limit: usize,
    /// Per-observer send buffer, in frames.
    pub session_buffer: usize,
    /// Delete events older than this many days; `None` keeps everything.
    pub retention_days: Option<u32>,
    /// Seconds between retention sweeps.
    pub retention_interval_secs: u64,
    /// Maximum pooled database connections.
    pub pool_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4000,
            database_path: PathBuf::from("events.db"),
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            session_buffer: DEFAULT_SESSION_BUFFER,
            retention_days: None,
            retention_interval_secs: 3600,
            pool_size: 16,
        }
    }
}

impl ServerConfig {
    /// `host:port` for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs.max(1))
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            pool_size: self.pool_size.max(1),
            ..ConnectionConfig::default()
        }
    }
}
