//! Timestamp helpers.
//!
//! Timestamps are stored as fixed-width UTC strings
//! (`YYYY-MM-DDTHH:MM:SS.ffffffZ`) so that SQL string comparison orders
//! them chronologically.

use chrono::{DateTime, NaiveDateTime, Utc};

const STORAGE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Format a UTC datetime in the storage format.
pub fn to_storage(dt: &DateTime<Utc>) -> String {
    dt.format(STORAGE_FORMAT).to_string()
}

/// Current time in the storage format.
pub fn now_string() -> String {
    to_storage(&Utc::now())
}

/// Parse a stored timestamp.
///
/// Also accepts RFC 3339 and SQLite's `datetime('now')` format.
pub fn parse_stored(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, STORAGE_FORMAT) {
        return Some(naive.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Convert a stored timestamp to RFC 3339 for API responses.
///
/// Returns the input unchanged if it cannot be parsed.
pub fn to_rfc3339(s: &str) -> String {
    parse_stored(s)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| s.to_string())
}
