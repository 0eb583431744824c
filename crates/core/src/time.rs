//! Millisecond wall-clock helpers.
//!
//! All persisted timestamps are milliseconds since the Unix epoch. The RESP
//! surface renders them as RFC 3339 strings.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Render an epoch-millisecond timestamp as an RFC 3339 string (UTC, seconds).
///
/// Out-of-range values render as the epoch itself rather than panicking.
pub fn format_rfc3339_ms(ms: u64) -> String {
    let dt = DateTime::<Utc>::from_timestamp_millis(ms as i64)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp_millis(0).unwrap());
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}
