//! Time and timestamp utilities

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Milliseconds in one day
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Source of "now" for the store
///
/// Retention windows and the 24h / 7 day aggregates are computed against this
/// clock so that tests can move time explicitly.
pub trait Clock: Send + Sync {
    /// Current Unix time in milliseconds
    fn now_ms(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Format as RFC 3339 with millisecond precision and a `Z` suffix
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time formatted with [`format_timestamp`]
pub fn now_iso8601() -> String {
    format_timestamp(Utc::now())
}

/// Parse an ISO-8601 timestamp into Unix milliseconds
///
/// Accepts RFC 3339 (any offset) and zone-less date-times such as Python's
/// `datetime.isoformat()` output, which are read as UTC.
pub fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}

/// Convert stored Unix milliseconds back into a UTC date-time
pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let ms = parse_timestamp_ms("2026-01-01T01:00:00+01:00").unwrap();
        assert_eq!(ms, parse_timestamp_ms("2026-01-01T00:00:00Z").unwrap());
    }

    #[test]
    fn test_parse_python_isoformat() {
        assert!(parse_timestamp_ms("2026-03-04T05:06:07.123456+00:00").is_some());
        assert!(parse_timestamp_ms("2026-03-04T05:06:07.123456").is_some());
        assert!(parse_timestamp_ms("2026-03-04 05:06:07").is_some());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp_ms("yesterday").is_none());
        assert!(parse_timestamp_ms("").is_none());
    }

    #[test]
    fn test_format_roundtrip() {
        let now = Utc::now();
        let formatted = format_timestamp(now);
        assert!(formatted.ends_with('Z'));
        assert_eq!(parse_timestamp_ms(&formatted), Some(now.timestamp_millis()));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        clock.advance(DAY_MS);
        assert_eq!(clock.now_ms(), 1_000 + DAY_MS);
        clock.set(5);
        assert_eq!(clock.now_ms(), 5);
    }
}
