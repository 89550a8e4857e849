//! Utility functions and helpers
//!
//! This module contains timestamp utilities and the injectable clock.

pub mod time;

pub use time::{
    format_timestamp, from_millis, now_iso8601, parse_timestamp_ms, Clock, ManualClock,
    SystemClock, DAY_MS,
};
