//! Input validation for events and query filters
//!
//! Everything a producer or observer sends passes through here before it
//! reaches the store.

mod types;

pub use types::{validate_candidate, validate_event_type, validate_filter, validate_new_event};
