//! Normalization of raw audit events into flat CSV records
use crate::datetime::{EventDateTime, parse_event_datetime};
use crate::error::{AuditError, Result};
use api360_client::{AuditLogCategory, FetchedEvent};
use serde_json::Value;
use std::borrow::Cow;

/// Column order of mail audit files
pub const MAIL_FIELDS: [&str; 27] = [
    "eventType",
    "date",
    "date_year",
    "date_month",
    "date_day",
    "date_hour",
    "date_minits",
    "userLogin",
    "userName",
    "from",
    "to",
    "subject",
    "folderName",
    "folderType",
    "labels",
    "orgId",
    "requestId",
    "clientIp",
    "userUid",
    "msgId",
    "uniqId",
    "source",
    "mid",
    "cc",
    "bcc",
    "destMid",
    "actorUid",
];

/// Column order of disk audit files
pub const DISK_FIELDS: [&str; 27] = [
    "eventType",
    "date",
    "date_year",
    "date_month",
    "date_day",
    "date_hour",
    "date_minits",
    "userLogin",
    "userName",
    "ownerLogin",
    "ownerName",
    "resourceFileId",
    "path",
    "size",
    "lastModificationDate",
    "modified_date_year",
    "modified_date_month",
    "modified_date_day",
    "modified_date_hour",
    "modified_date_minits",
    "rights",
    "orgId",
    "userUid",
    "requestId",
    "ownerUid",
    "uniqId",
    "clientIp",
];

/// Stand-in for `;` inside free-text values
pub const SEMICOLON_SENTINEL: &str = "&_semicolon_&";

/// Field list for a category
#[must_use]
pub fn fields_for(category: AuditLogCategory) -> &'static [&'static str] {
    match category {
        AuditLogCategory::Mail => &MAIL_FIELDS,
        AuditLogCategory::Disk => &DISK_FIELDS,
    }
}

/// One CSV-ready row with a fixed field order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    fields: &'static [&'static str],
    values: Vec<String>,
}

impl Record {
    /// Field names, equal to the file header
    #[must_use]
    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    /// Values in field order
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Value of a named field
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .position(|f| *f == name)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    /// Display form of the event date
    #[must_use]
    pub fn date(&self) -> &str {
        self.get("date").unwrap_or_default()
    }
}

/// Replace `;` with the sentinel
#[must_use]
pub fn escape_field(value: &str) -> String {
    value.replace(';', SEMICOLON_SENTINEL)
}

/// Restore `;` from the sentinel
#[must_use]
pub fn unescape_field(value: &str) -> String {
    value.replace(SEMICOLON_SENTINEL, ";")
}

/// Columns holding an event timestamp in display form
const DATE_COLUMNS: [&str; 2] = ["date", "lastModificationDate"];

/// Form of a stored or normalized value used for duplicate detection
///
/// Rows written by earlier exporters may keep `;` in any column and the raw
/// ISO text (`T` separator, `Z` suffix) in `lastModificationDate`; both are
/// brought to the form `normalize` produces.
#[must_use]
pub fn comparable_value<'a>(field: &str, value: &'a str) -> Cow<'a, str> {
    let is_date = DATE_COLUMNS.contains(&field) && value.contains(['T', 'Z']);
    if !is_date && !value.contains(';') {
        return Cow::Borrowed(value);
    }
    let mut value = escape_field(value);
    if is_date {
        value = value.replace('T', " ").replace('Z', "");
    }
    Cow::Owned(value)
}

/// Normalize a fetched event of the given category
///
/// # Errors
///
/// Returns `AuditError::Record` if a required date is missing or malformed.
pub fn normalize(category: AuditLogCategory, event: &FetchedEvent) -> Result<Record> {
    match category {
        AuditLogCategory::Mail => normalize_mail(&event.raw),
        AuditLogCategory::Disk => normalize_disk(&event.raw),
    }
}

/// Normalize a mail audit event
///
/// # Errors
///
/// Returns `AuditError::Record` if `date` is missing or malformed.
pub fn normalize_mail(raw: &Value) -> Result<Record> {
    let date = required_date(raw, "date")?;
    let mut values = Vec::with_capacity(MAIL_FIELDS.len());

    values.push(text(raw, "eventType"));
    push_date(&mut values, &date);
    for key in ["userLogin", "userName", "from", "to", "subject", "folderName", "folderType"] {
        values.push(text(raw, key));
    }
    values.push(labels(raw));
    values.push(text(raw, "orgId"));
    for key in [
        "requestId", "clientIp", "userUid", "msgId", "uniqId", "source", "mid", "cc", "bcc",
        "destMid", "actorUid",
    ] {
        values.push(text(raw, key));
    }

    Ok(Record {
        fields: &MAIL_FIELDS,
        values,
    })
}

/// Normalize a disk audit event
///
/// # Errors
///
/// Returns `AuditError::Record` if `date` or `lastModificationDate` is
/// missing or malformed.
pub fn normalize_disk(raw: &Value) -> Result<Record> {
    let date = required_date(raw, "date")?;
    let modified = required_date(raw, "lastModificationDate")?;
    let mut values = Vec::with_capacity(DISK_FIELDS.len());

    values.push(text(raw, "eventType"));
    push_date(&mut values, &date);
    for key in [
        "userLogin",
        "userName",
        "ownerLogin",
        "ownerName",
        "resourceFileId",
        "path",
        "size",
    ] {
        values.push(text(raw, key));
    }
    push_date(&mut values, &modified);
    for key in ["rights", "orgId", "userUid", "requestId", "ownerUid", "uniqId", "clientIp"] {
        values.push(text(raw, key));
    }

    Ok(Record {
        fields: &DISK_FIELDS,
        values,
    })
}

fn required_date(raw: &Value, key: &str) -> Result<EventDateTime> {
    let value = raw
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AuditError::Record(format!("event has no '{key}' string")))?;
    parse_event_datetime(value).map_err(|e| AuditError::Record(format!("{key}: {e}")))
}

fn push_date(values: &mut Vec<String>, date: &EventDateTime) {
    values.push(date.display.clone());
    values.extend(date.parts());
}

/// String value of a key; other scalars as JSON text, null or missing as ""
fn text(raw: &Value, key: &str) -> String {
    match raw.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => escape_field(s),
        Some(other) => escape_field(&other.to_string()),
    }
}

fn labels(raw: &Value) -> String {
    match raw.get("labels") {
        Some(Value::Array(items)) => {
            let joined = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            escape_field(&joined)
        }
        _ => text(raw, "labels"),
    }
}
