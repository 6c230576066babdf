//! Timestamp and calendar-day utilities
//!
//! Timestamps are stored in SQLite as fixed-precision RFC 3339 text so that
//! lexicographic comparison in SQL matches chronological order.

use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage (`YYYY-MM-DDTHH:MM:SS.ffffffZ`)
pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn from_db_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Bad timestamp {:?}: {}", value, e)))
}

/// Format a timestamp for clients, second resolution (`YYYY-MM-DDTHH:MM:SSZ`)
pub fn to_iso_seconds(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Half-open UTC window `[day 00:00, day+1 00:00)`
pub fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

/// Current UTC calendar day
pub fn today() -> NaiveDate {
    now().date_naive()
}

/// Parse a calendar day given as `YYYYMMDD` or `YYYY-MM-DD`
pub fn parse_day(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    let bytes = value.as_bytes();

    let parsed = match bytes.len() {
        8 if bytes.iter().all(u8::is_ascii_digit) => {
            NaiveDate::parse_from_str(value, "%Y%m%d").ok()
        }
        10 if bytes[4] == b'-' && bytes[7] == b'-' => {
            NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
        }
        _ => None,
    };

    parsed.ok_or_else(|| Error::InvalidInput(format!("invalid date: {:?}", value)))
}

/// `YYYYMMDD` form of a day, as used in archive file names
pub fn compact_day(day: NaiveDate) -> String {
    day.format("%Y%m%d").to_string()
}

/// `YYYY-MM-DD` form of a day, as reported to clients
pub fn dashed_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}
