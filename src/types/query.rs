//! Query, aggregate and snapshot shapes shared by the store, the REST API and
//! the realtime protocol.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::event::StoredEvent;

/// Default page size for event queries
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Upper bound on any single page
pub const MAX_QUERY_LIMIT: usize = 1000;

/// Filter parameters for event queries
///
/// All fields are optional; an empty filter matches every event. Used both as
/// REST query parameters and as the body of a realtime `filter` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(
        default,
        rename = "hook_event_type",
        alias = "event_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub event_type: Option<String>,
    /// Inclusive lower bound on the producer timestamp (ISO-8601)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    /// Inclusive upper bound on the producer timestamp (ISO-8601)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    /// Substring matched against the payload JSON and the summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source_app(mut self, source_app: impl Into<String>) -> Self {
        self.source_app = Some(source_app.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn between(mut self, since: Option<String>, until: Option<String>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Page size with default applied and clamped to [`MAX_QUERY_LIMIT`]
    pub fn normalized_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT).min(MAX_QUERY_LIMIT)
    }

    pub fn normalized_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

/// Aggregate counts over the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    pub total_events: u64,
    pub events_last_24h: u64,
    pub by_event_type: BTreeMap<String, u64>,
    pub by_source_app: BTreeMap<String, u64>,
}

/// Distinct values a client can offer as filter choices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub source_apps: Vec<String>,
    pub hook_event_types: Vec<String>,
    /// Sessions seen in the last seven days
    pub session_ids: Vec<String>,
}

/// One page of query results plus the unpaginated match count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<StoredEvent>,
    pub total: u64,
}

/// Recent history and stats sent to an observer when it connects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub events: Vec<StoredEvent>,
    pub stats: EventStats,
}

impl Snapshot {
    /// Highest event id in the snapshot, 0 when it is empty
    pub fn newest_id(&self) -> i64 {
        self.events.iter().map(|e| e.id).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_defaults_and_clamps() {
        assert_eq!(EventFilter::new().normalized_limit(), DEFAULT_QUERY_LIMIT);
        assert_eq!(EventFilter::new().page(5, 0).normalized_limit(), 5);
        assert_eq!(
            EventFilter::new().page(50_000, 0).normalized_limit(),
            MAX_QUERY_LIMIT
        );
    }

    #[test]
    fn test_filter_accepts_event_type_alias() {
        let filter: EventFilter =
            serde_json::from_str(r#"{"event_type":"Stop","limit":3}"#).unwrap();
        assert_eq!(filter.event_type.as_deref(), Some("Stop"));
        assert_eq!(filter.limit, Some(3));
    }

    #[test]
    fn test_empty_filter_serializes_to_empty_object() {
        let json = serde_json::to_string(&EventFilter::new()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_empty_snapshot_newest_id_is_zero() {
        let snapshot = Snapshot {
            events: Vec::new(),
            stats: EventStats::default(),
        };
        assert_eq!(snapshot.newest_id(), 0);
    }
}
