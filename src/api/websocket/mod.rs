//! WebSocket broadcast hub
//!
//! Observers connect at `/stream`, receive an `initial` snapshot, then every
//! newly stored event as an `event` frame.
//!
//! ## Features
//! - Non-blocking fan-out with a bounded send buffer per session
//! - Slow observers are dropped with close code 1013 instead of stalling ingestion
//! - Per-session event type subscriptions
//! - One-shot `filter` queries and on-demand snapshots over the same socket

pub mod handler;
pub mod hub;
pub mod session;
pub mod state;

pub use hub::{BroadcastHub, FanOutReport, DEFAULT_SESSION_BUFFER};
pub use session::{CloseReason, DeliveryError, ObserverSession, SessionId, SessionState};
pub use state::AppState;
