//! Event types for the hook event pipeline
//!
//! An event is one immutable record describing something an agent did or
//! experienced. Producers submit a [`CandidateEvent`], validation turns it into
//! a [`NewEvent`], and the store hands back a [`StoredEvent`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle stage an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HookEventType {
    /// Before a tool runs
    PreToolUse,
    /// After a tool ran
    PostToolUse,
    /// The user submitted a prompt
    UserPromptSubmit,
    /// The agent raised a notification
    Notification,
    /// The agent session stopped
    Stop,
    /// A sub-agent session stopped
    SubagentStop,
}

impl HookEventType {
    /// Every variant, in lifecycle order
    pub const ALL: [HookEventType; 6] = [
        HookEventType::PreToolUse,
        HookEventType::PostToolUse,
        HookEventType::UserPromptSubmit,
        HookEventType::Notification,
        HookEventType::Stop,
        HookEventType::SubagentStop,
    ];

    /// Wire name, as stored in the `hook_event_type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEventType::PreToolUse => "PreToolUse",
            HookEventType::PostToolUse => "PostToolUse",
            HookEventType::UserPromptSubmit => "UserPromptSubmit",
            HookEventType::Notification => "Notification",
            HookEventType::Stop => "Stop",
            HookEventType::SubagentStop => "SubagentStop",
        }
    }
}

impl fmt::Display for HookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of the six hook event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType(pub String);

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown hook event type '{}'", self.0)
    }
}

impl std::error::Error for UnknownEventType {}

impl FromStr for HookEventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookEventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// One entry of the producer-supplied transcript
///
/// Kept exactly as the producer sent it. Transcript lines do not always carry
/// a top-level `role` or `content`, so both are read through accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatMessage(Map<String, Value>);

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<Value>) -> Self {
        let mut entry = Map::new();
        entry.insert("role".into(), Value::String(role.into()));
        entry.insert("content".into(), content.into());
        Self(entry)
    }

    pub fn role(&self) -> Option<&str> {
        self.0.get("role").and_then(Value::as_str)
    }

    /// `Some(Value::Null)` when the producer sent an explicit null
    pub fn content(&self) -> Option<&Value> {
        self.0.get("content")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for ChatMessage {
    fn from(entry: Map<String, Value>) -> Self {
        Self(entry)
    }
}

/// Event as submitted by a producer, before validation
///
/// Every field is optional so that a missing field is reported as a
/// validation failure naming the field rather than a generic parse error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateEvent {
    #[serde(default)]
    pub source_app: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, rename = "hook_event_type", alias = "event_type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub chat: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// A validated event ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub source_app: String,
    pub session_id: String,
    pub event_type: HookEventType,
    pub payload: Map<String, Value>,
    pub chat: Option<Vec<ChatMessage>>,
    pub summary: Option<String>,
    /// Producer-asserted time, kept verbatim
    pub timestamp: String,
    /// `timestamp` parsed to Unix milliseconds, used only for range filters
    pub timestamp_ms: i64,
}

impl NewEvent {
    /// Build an event stamped with the current time
    pub fn new(
        source_app: impl Into<String>,
        session_id: impl Into<String>,
        event_type: HookEventType,
        payload: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            source_app: source_app.into(),
            session_id: session_id.into(),
            event_type,
            payload,
            chat: None,
            summary: None,
            timestamp: crate::utils::format_timestamp(now),
            timestamp_ms: now.timestamp_millis(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_chat(mut self, chat: Vec<ChatMessage>) -> Self {
        self.chat = Some(chat);
        self
    }
}

/// An event as persisted by the store
///
/// `id`, `created_at` and `updated_at` are assigned at insert time and the
/// record is never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub source_app: String,
    pub session_id: String,
    #[serde(rename = "hook_event_type", alias = "event_type")]
    pub event_type: HookEventType,
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<Vec<ChatMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub timestamp: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredEvent {
    /// True when the stored record carries exactly the producer fields of `event`
    pub fn matches(&self, event: &NewEvent) -> bool {
        self.source_app == event.source_app
            && self.session_id == event.session_id
            && self.event_type == event.event_type
            && self.payload == event.payload
            && self.chat == event.chat
            && self.summary == event.summary
            && self.timestamp == event.timestamp
    }
}
