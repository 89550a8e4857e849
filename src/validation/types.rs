//! Validation of producer input and query parameters

use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::types::{CandidateEvent, EventFilter, HookEventType, NewEvent};
use crate::utils::{now_iso8601, parse_timestamp_ms};

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field)),
    }
}

/// Parse a hook event type name
pub fn validate_event_type(raw: &str) -> Result<HookEventType, ValidationError> {
    raw.parse::<HookEventType>()
        .map_err(|_| ValidationError::UnknownEventType(raw.to_string()))
}

/// Turn a producer's candidate into an insertable event
///
/// `source_app`, `session_id` and `hook_event_type` must be present and
/// non-blank. A missing payload becomes an empty object and a missing
/// timestamp becomes the current time.
pub fn validate_candidate(candidate: CandidateEvent) -> Result<NewEvent, ValidationError> {
    let source_app = required(candidate.source_app, "source_app")?;
    let session_id = required(candidate.session_id, "session_id")?;
    let event_type = validate_event_type(&required(candidate.event_type, "hook_event_type")?)?;

    let payload = match candidate.payload {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(ValidationError::InvalidPayload),
    };

    let timestamp = match candidate.timestamp {
        Some(ts) if !ts.trim().is_empty() => ts,
        _ => now_iso8601(),
    };
    let timestamp_ms = parse_timestamp_ms(&timestamp)
        .ok_or_else(|| ValidationError::InvalidTimestamp(timestamp.clone()))?;

    Ok(NewEvent {
        source_app,
        session_id,
        event_type,
        payload,
        chat: candidate.chat,
        summary: candidate.summary,
        timestamp,
        timestamp_ms,
    })
}

/// Re-check an already typed event before it is written
pub fn validate_new_event(event: &NewEvent) -> Result<(), ValidationError> {
    if event.source_app.trim().is_empty() {
        return Err(ValidationError::MissingField("source_app"));
    }
    if event.session_id.trim().is_empty() {
        return Err(ValidationError::MissingField("session_id"));
    }
    Ok(())
}

/// Check filter values that the store cannot interpret
pub fn validate_filter(filter: &EventFilter) -> Result<(), ValidationError> {
    if let Some(event_type) = filter.event_type.as_deref() {
        validate_event_type(event_type)?;
    }
    for bound in [&filter.since, &filter.until].into_iter().flatten() {
        if parse_timestamp_ms(bound).is_none() {
            return Err(ValidationError::InvalidTimestamp(bound.clone()));
        }
    }
    Ok(())
}
