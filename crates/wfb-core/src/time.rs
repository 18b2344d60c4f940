//! Timestamp formatting and parsing for stored and exchanged event times.
//!
//! Storage only keeps microsecond resolution, so every event time is
//! truncated to microseconds on the way in. The exchange format is always
//! UTC; local time is only used when building archive paths and when
//! interpreting user-entered date strings.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{Error, Result};

/// Exchange format for stored and serialized timestamps (UTC, microseconds).
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Format accepted for user-entered local date-times (`yyyy-MM-dd HH:mm:ss.S`).
pub const LOCAL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Format accepted for user-entered local dates.
pub const LOCAL_DATE_FORMAT: &str = "%Y-%m-%d";

/// Drop any sub-microsecond precision.
pub fn truncate_to_micros(t: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = t.timestamp_subsec_nanos();
    let truncated = nanos - nanos % 1_000;
    // with_nanosecond only fails for values >= 2e9, which truncation cannot produce
    chrono::Timelike::with_nanosecond(&t, truncated).unwrap_or(t)
}

/// Format a timestamp in the UTC exchange format, e.g. `2017-09-14 15:00:00.100000`.
pub fn format_utc(t: &DateTime<Utc>) -> String {
    t.format(DATETIME_FORMAT).to_string()
}

/// Parse a timestamp written in the UTC exchange format.
pub fn parse_utc(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), DATETIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::InvalidInput(format!("Invalid UTC datetime '{}': {}", s, e)))
}

/// Interpret a `yyyy-MM-dd HH:mm:ss.S` string in the local time zone.
pub fn parse_local_datetime(s: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), LOCAL_DATETIME_FORMAT)
        .map_err(|e| Error::InvalidInput(format!("Invalid datetime '{}': {}", s, e)))?;
    local_to_utc(naive, s)
}

/// Interpret a `yyyy-MM-dd` string as local midnight.
pub fn parse_local_date(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s.trim(), LOCAL_DATE_FORMAT)
        .map_err(|e| Error::InvalidInput(format!("Invalid date '{}': {}", s, e)))?;
    local_to_utc(date.and_time(chrono::NaiveTime::MIN), s)
}

fn local_to_utc(naive: NaiveDateTime, original: &str) -> Result<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "Datetime '{}' does not exist in the local time zone",
                original
            ))
        })
}
