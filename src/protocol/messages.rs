//! Realtime wire messages
//!
//! Every frame is a JSON object tagged as `{"type": ..., "data": ...}`.
//! `filter` is used in both directions: a client sends filter parameters and
//! the hub answers with the matching events.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{EventFilter, HookEventType, Snapshot, StoredEvent};

/// Frames sent by the hub to an observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Recent history and stats, sent on connect and on `snapshot` requests
    Initial(Snapshot),
    /// A newly stored event
    Event(StoredEvent),
    /// One-shot answer to a client `filter` request
    Filter(Vec<StoredEvent>),
    Error { message: String },
    Pong,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Event types named in a `subscribe` / `unsubscribe` frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub event_types: BTreeSet<HookEventType>,
}

/// Frames sent by an observer to the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Run a query and answer with a `filter` frame
    Filter(EventFilter),
    Ping,
    /// Restrict pushes to these event types (empty = everything)
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    /// Ask for a fresh `initial` frame
    Snapshot,
}

/// Client message types the hub understands
pub const CLIENT_MESSAGE_TYPES: &[&str] = &["filter", "ping", "subscribe", "unsubscribe", "snapshot"];

/// A client frame the hub could not act on
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown message type '{0}'")]
    UnknownType(String),
}

impl ClientMessage {
    pub fn subscribe(event_types: impl IntoIterator<Item = HookEventType>) -> Self {
        ClientMessage::Subscribe(Subscription {
            event_types: event_types.into_iter().collect(),
        })
    }

    pub fn unsubscribe(event_types: impl IntoIterator<Item = HookEventType>) -> Self {
        ClientMessage::Unsubscribe(Subscription {
            event_types: event_types.into_iter().collect(),
        })
    }

    /// Decode a text frame, telling an unknown `type` apart from a bad body
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let mut value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| ProtocolError::Malformed("expected a JSON object".into()))?;
        let kind = match object.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(ProtocolError::Malformed("'type' must be a string".into())),
            None => return Err(ProtocolError::Malformed("missing 'type'".into())),
        };
        if !CLIENT_MESSAGE_TYPES.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType(kind));
        }
        // A bare filter or subscribe frame means "no constraints".
        if matches!(kind.as_str(), "filter" | "subscribe" | "unsubscribe")
            && object.get("data").map_or(true, Value::is_null)
        {
            object.insert("data".into(), Value::Object(Default::default()));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
