// ⏰ Normalizer - one canonical representation for every timestamp
//
// Source extracts mix ISO-8601 (with and without offsets), US 12-hour
// timestamps and short day-first dates. Everything is converted to UTC and
// rendered as `2023-04-07T08:20:57.730+00:00`.
//
// JSON detail columns (`*_purchase_details`) are decoded here as well.
// Neither function ever fails the run: a field that cannot be parsed becomes
// `None` and the row carries on.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Output format for every timestamp the pipeline writes
pub const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f+00:00";

// ============================================================================
// TIMESTAMP FORMATS
// ============================================================================

/// One accepted input layout. Values without an offset are taken as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimestampFormat {
    /// `2023-04-07T08:20:57.730+00:00`, `2023-04-07T08:20:57Z`
    Rfc3339,

    /// Offset-aware strftime pattern
    WithOffset(&'static str),

    /// Naive date-time pattern, assumed UTC
    NaiveUtc(&'static str),

    /// Date-only pattern, midnight UTC
    DateOnlyUtc(&'static str),
}

/// Priority order matters: first match wins.
const TIMESTAMP_FORMATS: &[TimestampFormat] = &[
    TimestampFormat::Rfc3339,
    TimestampFormat::WithOffset("%Y-%m-%d %H:%M:%S%.f%z"),
    TimestampFormat::NaiveUtc("%Y-%m-%dT%H:%M:%S%.f"),
    TimestampFormat::NaiveUtc("%Y-%m-%d %H:%M:%S%.f"),
    TimestampFormat::NaiveUtc("%m/%d/%Y %I:%M:%S %p"),
    TimestampFormat::NaiveUtc("%d/%m/%y %H:%M"),
    TimestampFormat::DateOnlyUtc("%Y-%m-%d"),
];

impl TimestampFormat {
    fn parse(self, raw: &str) -> Option<DateTime<Utc>> {
        match self {
            TimestampFormat::Rfc3339 => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            TimestampFormat::WithOffset(pattern) => DateTime::parse_from_str(raw, pattern)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            TimestampFormat::NaiveUtc(pattern) => NaiveDateTime::parse_from_str(raw, pattern)
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive)),
            TimestampFormat::DateOnlyUtc(pattern) => NaiveDate::parse_from_str(raw, pattern)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive)),
        }
    }
}

/// Parse a raw timestamp using the first matching known format.
///
/// Returns `None` for empty input or when no format matches.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    TIMESTAMP_FORMATS.iter().find_map(|format| format.parse(raw))
}

/// Render a timestamp in the canonical output form
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(CANONICAL_FORMAT).to_string()
}

/// Parse + render in one step. Canonical input comes back unchanged.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    parse_timestamp(raw).map(|ts| format_timestamp(&ts))
}

/// Parse a timestamp cell, logging a warning when a non-empty value is
/// rejected.
pub fn timestamp_field(column: &str, raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw.map(str::trim).filter(|value| !value.is_empty())?;

    let parsed = parse_timestamp(raw);
    if parsed.is_none() {
        warn!(column, value = raw, "Failed to parse datetime; leaving field empty");
    }
    parsed
}

// ============================================================================
// PURCHASE DETAILS (JSON)
// ============================================================================

/// Decoded `*_purchase_details` column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurchaseDetails {
    pub name: Option<String>,
    pub source: Option<String>,
}

/// Decode a JSON detail cell.
///
/// Empty cells yield `None` silently; malformed JSON (or JSON that is not an
/// object with string `name`/`source`) yields `None` with a warning.
pub fn details_field(column: &str, raw: Option<&str>) -> Option<PurchaseDetails> {
    let raw = raw.map(str::trim).filter(|value| !value.is_empty())?;

    match serde_json::from_str::<PurchaseDetails>(raw) {
        Ok(details) => Some(details),
        Err(err) => {
            warn!(column, value = raw, error = %err, "Failed to parse JSON details");
            None
        }
    }
}
