//! API module for HTTP and WebSocket endpoints
//!
//! REST ingestion and queries plus the realtime `/stream` socket.

pub mod http;
pub mod rest;
pub mod websocket;

pub use http::create_router;
