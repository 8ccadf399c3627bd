//! Client timestamp normalization
//!
//! Field devices send timestamps in whatever shape their platform produces.
//! Everything is folded into a UTC instant truncated to microseconds, which is
//! also the precision of the stored `updated_at` columns.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use serde_json::Value;

/// Naive layouts read as UTC
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Offset layouts that RFC 3339 parsing rejects (`+0200`, space separator)
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Parse a client timestamp into a UTC instant.
///
/// Returns `None` for empty or unparseable input; callers pick the fallback.
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(canonical(dt.with_timezone(&Utc)));
    }

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Some(canonical(dt.with_timezone(&Utc)));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(canonical(Utc.from_utc_datetime(&naive)));
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Parse an optional JSON value; anything but a string counts as missing
pub fn parse_value(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value.and_then(Value::as_str).and_then(parse)
}

/// Cursor semantics: missing or invalid means "pull everything"
pub fn parse_or_epoch(value: Option<&Value>) -> DateTime<Utc> {
    parse_value(value).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Creation semantics: missing or invalid means the given server instant
pub fn parse_or(value: Option<&Value>, now: DateTime<Utc>) -> DateTime<Utc> {
    parse_value(value).unwrap_or(now)
}

/// The single server instant stamped on everything one request writes
pub fn server_now() -> DateTime<Utc> {
    canonical(Utc::now())
}

/// Truncate to the stored precision
pub fn canonical(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(6)
}

/// Fixed-width storage/wire format; lexical order equals chronological order
pub fn format(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Read back a stored timestamp column
pub fn from_storage(value: &str) -> DateTime<Utc> {
    parse(value).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
