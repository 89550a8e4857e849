//! Data types for the hook event pipeline
//!
//! This module contains the event records and the query/aggregate shapes used
//! throughout the application.

mod event;
mod query;

pub use event::{
    CandidateEvent, ChatMessage, HookEventType, NewEvent, StoredEvent, UnknownEventType,
};
pub use query::{
    EventFilter, EventPage, EventStats, FilterOptions, Snapshot, DEFAULT_QUERY_LIMIT,
    MAX_QUERY_LIMIT,
};
