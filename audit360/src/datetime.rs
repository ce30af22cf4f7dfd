//! DateTime parsing for audit events and stored records
use crate::error::{AuditError, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime};

/// Format of the `date` column as stored in CSV files (without fractions)
const FORMAT_RECORD_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// Length of `YYYY-MM-DD HH:MM:SS`
const RECORD_DATETIME_LEN: usize = 19;

/// A parsed event timestamp together with its display text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDateTime {
    /// ISO text with `T` replaced by a space and the `Z` suffix removed
    pub display: String,
    /// Parsed value, keeping the offset the API sent
    pub value: DateTime<FixedOffset>,
}

impl EventDateTime {
    /// Year, month, day, hour and minute as zero-padded strings
    #[must_use]
    pub fn parts(&self) -> [String; 5] {
        [
            self.value.format("%Y").to_string(),
            self.value.format("%m").to_string(),
            self.value.format("%d").to_string(),
            self.value.format("%H").to_string(),
            self.value.format("%M").to_string(),
        ]
    }
}

/// Parse an RFC 3339 timestamp from an API event
///
/// # Errors
///
/// Returns error if the text is not a valid RFC 3339 timestamp
///
/// # Examples
///
/// ```
/// use audit360::datetime::parse_event_datetime;
///
/// let parsed = parse_event_datetime("2024-03-01T10:15:30.250Z").unwrap();
/// assert_eq!(parsed.display, "2024-03-01 10:15:30.250");
/// assert_eq!(parsed.parts()[4], "15");
/// ```
pub fn parse_event_datetime(raw: &str) -> Result<EventDateTime> {
    let value = DateTime::parse_from_rfc3339(raw).map_err(|e| {
        AuditError::InvalidDateTimeFormat(format!(
            "'{raw}' is not an ISO-8601 timestamp: {e}"
        ))
    })?;
    let display = raw.replacen('T', " ", 1);
    let display = display.strip_suffix('Z').unwrap_or(&display).to_string();
    Ok(EventDateTime { display, value })
}

/// Parse the resume anchor from a stored `date` value
///
/// Only the leading `YYYY-MM-DD HH:MM:SS` is used; fractional seconds are
/// dropped.
///
/// # Errors
///
/// Returns error if the value is shorter than 19 characters or malformed
pub fn parse_record_datetime(value: &str) -> Result<NaiveDateTime> {
    let head = value.get(..RECORD_DATETIME_LEN).ok_or_else(|| {
        AuditError::InvalidDateTimeFormat(format!(
            "'{value}' is too short for YYYY-MM-DD HH:MM:SS"
        ))
    })?;
    NaiveDateTime::parse_from_str(head, FORMAT_RECORD_DATETIME).map_err(|e| {
        AuditError::InvalidDateTimeFormat(format!(
            "Invalid record datetime '{value}': {e}. Expected: YYYY-MM-DD HH:MM:SS"
        ))
    })
}
