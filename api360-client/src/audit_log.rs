//! Audit Log API
//!
//! Paginated retrieval of mail and disk audit events for an organization.
//!
//! The endpoints return events newest-first, 100 per page at most, and stop
//! honouring continuation tokens after a number of pages. The fetcher walks a
//! bounded number of pages by token, then re-anchors the window with an upper
//! time bound taken from the current page and starts a fresh token chain.
//! Re-anchoring re-reads a few events, so events are deduplicated by content.
use crate::{Api360Client, Api360Error};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use xxhash_rust::xxh3::xxh3_64;

/// Query timestamp format accepted by `afterDate`/`beforeDate`
const API_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Audit event category, one endpoint each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditLogCategory {
    Mail,
    Disk,
}

impl AuditLogCategory {
    /// Every category, in processing order
    pub const ALL: [AuditLogCategory; 2] = [AuditLogCategory::Mail, AuditLogCategory::Disk];

    /// Path segment of the category endpoint
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mail => "mail",
            Self::Disk => "disk",
        }
    }
}

impl fmt::Display for AuditLogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditLogCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mail" => Ok(Self::Mail),
            "disk" => Ok(Self::Disk),
            _ => Err(format!(
                "Invalid audit log category '{s}'. Valid values: mail, disk"
            )),
        }
    }
}

/// One page of the audit-log response
#[derive(Debug, Clone, Deserialize)]
pub struct AuditLogPage {
    /// Events on this page, newest first
    pub events: Vec<Value>,
    /// Continuation token; empty or absent on the last page
    #[serde(rename = "nextPageToken", default)]
    pub next_page_token: Option<String>,
}

/// Pagination tuning for [`AuditLogApi::fetch_events`]
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Events requested per page
    pub page_size: u32,
    /// Backward shift applied to the resume anchor
    pub overlap: TimeDelta,
    /// Pages followed by continuation token before re-anchoring
    pub max_token_pages: u32,
    /// Position from the end of the page whose date becomes the new upper bound
    pub reanchor_offset: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            overlap: TimeDelta::minutes(2),
            max_token_pages: 20,
            reanchor_offset: 10,
        }
    }
}

/// A raw event with its parsed timestamp and dedup key
#[derive(Debug, Clone)]
pub struct FetchedEvent {
    /// Event exactly as received
    pub raw: Value,
    /// Parsed `date` field
    pub timestamp: DateTime<Utc>,
    /// xxh3 of the key-order independent JSON text
    pub key: u64,
}

/// Successful fetch result; an empty `events` list means nothing new
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Unique events, oldest first
    pub events: Vec<FetchedEvent>,
    /// Number of pages requested
    pub pages: u32,
}

/// Format a timestamp for the `afterDate`/`beforeDate` query parameters
#[must_use]
pub fn format_api_datetime(value: NaiveDateTime) -> String {
    value.format(API_DATETIME_FORMAT).to_string()
}

/// Serialize a JSON value with object keys sorted at every level
///
/// # Errors
///
/// Returns an error if a string or number cannot be serialized.
pub fn canonical_json(value: &Value) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                if let Some(item) = map.get(key.as_str()) {
                    write_canonical(item, out)?;
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        other => out.push_str(&serde_json::to_string(other)?),
    }
    Ok(())
}

/// Parse the `date` field of a raw event
///
/// # Errors
///
/// Returns `InvalidResponse` if the field is missing or not RFC 3339.
pub fn event_timestamp(event: &Value) -> Result<DateTime<Utc>, Api360Error> {
    let date = event_date(event)?;
    DateTime::parse_from_rfc3339(date)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Api360Error::InvalidResponse(format!("Invalid event date '{date}': {e}")))
}

fn event_date(event: &Value) -> Result<&str, Api360Error> {
    event
        .get("date")
        .and_then(Value::as_str)
        .ok_or_else(|| Api360Error::InvalidResponse("Event without a 'date' field".to_string()))
}

/// Date of the event `offset` positions from the end of the page, clamped to the first event
fn reanchor_date(events: &[Value], offset: usize) -> Result<String, Api360Error> {
    let index = events.len().saturating_sub(offset.max(1));
    let event = events.get(index).ok_or_else(|| {
        Api360Error::InvalidResponse("Empty page with a continuation token".to_string())
    })?;
    event_date(event).map(str::to_string)
}

/// The Audit Log API interface
pub struct AuditLogApi<'a> {
    client: &'a Api360Client,
    org_id: u64,
}

impl<'a> AuditLogApi<'a> {
    /// Create a new Audit Log API instance
    #[must_use]
    pub fn new(client: &'a Api360Client, org_id: u64) -> Self {
        Self { client, org_id }
    }

    fn endpoint(&self, category: AuditLogCategory) -> String {
        format!(
            "/security/v1/org/{}/audit_log/{}",
            self.org_id,
            category.as_str()
        )
    }

    /// Fetch a single page.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after retries or the body is not
    /// an audit-log page.
    pub async fn get_page(
        &self,
        category: AuditLogCategory,
        params: &[(&str, String)],
    ) -> Result<AuditLogPage, Api360Error> {
        self.client.get_json(&self.endpoint(category), params).await
    }

    /// Retrieve every event newer than `anchor` (minus the overlap window).
    ///
    /// Without an anchor the whole available history is downloaded. Events
    /// are deduplicated by canonical JSON and returned oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if any page fails after retries, a page is malformed,
    /// an event has no parseable `date`, or re-anchoring stops making progress.
    pub async fn fetch_events(
        &self,
        category: AuditLogCategory,
        anchor: Option<NaiveDateTime>,
        options: &FetchOptions,
    ) -> Result<FetchOutcome, Api360Error> {
        let after_date = anchor.map(|a| format_api_datetime(a - options.overlap));
        match &after_date {
            Some(after) => info!("Requesting {category} audit events after {after}"),
            None => info!("No resume anchor for {category} audit log, downloading full history"),
        }

        let mut before_date: Option<String> = None;
        let mut page_token: Option<String> = None;
        let mut token_pages: u32 = 0;
        let mut pages: u32 = 0;
        let mut seen: HashSet<u64> = HashSet::new();
        let mut events: Vec<FetchedEvent> = Vec::new();

        loop {
            let mut params: Vec<(&str, String)> =
                vec![("pageSize", options.page_size.to_string())];
            if let Some(after) = &after_date {
                params.push(("afterDate", after.clone()));
            }
            if let Some(before) = &before_date {
                params.push(("beforeDate", before.clone()));
            }
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let page = self.get_page(category, &params).await?;
            pages = pages.saturating_add(1);

            let mut added: usize = 0;
            for raw in &page.events {
                let key = xxh3_64(canonical_json(raw)?.as_bytes());
                if seen.insert(key) {
                    let timestamp = event_timestamp(raw)?;
                    events.push(FetchedEvent {
                        raw: raw.clone(),
                        timestamp,
                        key,
                    });
                    added = added.saturating_add(1);
                }
            }

            if let (Some(newest), Some(oldest)) = (page.events.first(), page.events.last()) {
                debug!(
                    "Received {} {category} events ({added} new), from {} to {}",
                    page.events.len(),
                    event_date(oldest).unwrap_or("?"),
                    event_date(newest).unwrap_or("?")
                );
            } else {
                debug!("Received empty {category} page");
            }

            let next_token = page.next_page_token.unwrap_or_default();
            if next_token.is_empty() {
                break;
            }

            if token_pages < options.max_token_pages {
                token_pages = token_pages.saturating_add(1);
                page_token = Some(next_token);
            } else {
                let anchor_date = reanchor_date(&page.events, options.reanchor_offset)?;
                if before_date.as_deref() == Some(anchor_date.as_str()) {
                    return Err(Api360Error::InvalidResponse(format!(
                        "Pagination stalled: re-anchoring at {anchor_date} repeats the previous window"
                    )));
                }
                debug!("Page budget used up, re-anchoring {category} window before {anchor_date}");
                page_token = None;
                before_date = Some(anchor_date);
                token_pages = 0;
            }
        }

        events.sort_by_key(|event| event.timestamp);
        info!(
            "Retrieved {} unique {category} events in {pages} pages",
            events.len()
        );
        Ok(FetchOutcome { events, pages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Api360Config, RetryConfig};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MAIL_PATH: &str = "/security/v1/org/42/audit_log/mail";

    fn test_client(server: &MockServer) -> Api360Client {
        let config = Api360Config::new("token".to_string())
            .with_base_url(server.uri())
            .with_retry_config(RetryConfig::new(2, 1));
        Api360Client::new(config).unwrap()
    }

    fn event(date: &str, uid: &str) -> Value {
        json!({ "eventType": "message_seen", "date": date, "uniqId": uid, "orgId": 42 })
    }

    fn page(events: Vec<Value>, token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "events": events, "nextPageToken": token }))
    }

    fn query_of(request: &wiremock::Request, key: &str) -> Option<String> {
        request
            .url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("mail".parse::<AuditLogCategory>().unwrap(), AuditLogCategory::Mail);
        assert_eq!("DISK".parse::<AuditLogCategory>().unwrap(), AuditLogCategory::Disk);
        assert!("calendar".parse::<AuditLogCategory>().is_err());
    }

    #[test]
    fn test_canonical_json_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":[3,{"q":1,"p":2}]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":[3,{"p":2,"q":1}],"y":2},"b":1}"#).unwrap();
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
        assert_eq!(
            canonical_json(&a).unwrap(),
            r#"{"a":{"x":[3,{"p":2,"q":1}],"y":2},"b":1}"#
        );
    }

    #[test]
    fn test_canonical_json_keeps_non_ascii() {
        let value = json!({ "subject": "Привет" });
        assert_eq!(canonical_json(&value).unwrap(), r#"{"subject":"Привет"}"#);
    }

    #[test]
    fn test_reanchor_date_offset_and_clamp() {
        let events: Vec<Value> = (0..12)
            .map(|i| event(&format!("2024-03-01T10:{:02}:00Z", 59 - i), &i.to_string()))
            .collect();
        assert_eq!(reanchor_date(&events, 10).unwrap(), "2024-03-01T10:57:00Z");

        let short = vec![event("2024-03-01T10:00:00Z", "a"), event("2024-03-01T09:00:00Z", "b")];
        assert_eq!(reanchor_date(&short, 10).unwrap(), "2024-03-01T10:00:00Z");
        assert!(reanchor_date(&[], 10).is_err());
    }

    #[test]
    fn test_event_timestamp_requires_date() {
        assert!(event_timestamp(&json!({ "eventType": "x" })).is_err());
        assert!(event_timestamp(&json!({ "date": "yesterday" })).is_err());
        let ts = event_timestamp(&json!({ "date": "2024-03-01T10:00:00.250Z" })).unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string(), "2024-03-01 10:00:00.250");
    }

    #[tokio::test]
    async fn test_full_download_without_anchor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MAIL_PATH))
            .respond_with(page(
                vec![event("2024-03-01T10:02:00Z", "b"), event("2024-03-01T10:01:00Z", "a")],
                "",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let outcome = client
            .audit_log_api(42)
            .fetch_events(AuditLogCategory::Mail, None, &FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.pages, 1);
        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.events[0].raw["uniqId"], "a");
        assert_eq!(outcome.events[1].raw["uniqId"], "b");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(query_of(&requests[0], "pageSize").as_deref(), Some("100"));
        assert!(query_of(&requests[0], "afterDate").is_none());
    }

    #[tokio::test]
    async fn test_anchor_shifted_by_overlap_keeps_all_events() {
        let server = MockServer::start().await;
        let events: Vec<Value> = (0..5)
            .map(|i| event(&format!("2024-03-01T10:0{}:00Z", 4 - i), &format!("e{i}")))
            .collect();
        Mock::given(method("GET"))
            .and(path(MAIL_PATH))
            .and(query_param("afterDate", "2024-03-01T09:58:00Z"))
            .respond_with(page(events, ""))
            .expect(1)
            .mount(&server)
            .await;

        let anchor =
            NaiveDateTime::parse_from_str("2024-03-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let client = test_client(&server);
        let outcome = client
            .audit_log_api(42)
            .fetch_events(AuditLogCategory::Mail, Some(anchor), &FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.events.len(), 5);
        assert!(
            outcome
                .events
                .windows(2)
                .all(|pair| pair[0].timestamp <= pair[1].timestamp)
        );
    }

    #[tokio::test]
    async fn test_token_pagination_dedups_across_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MAIL_PATH))
            .and(query_param_is_missing("pageToken"))
            .respond_with(page(
                vec![event("2024-03-01T10:03:00Z", "d"), event("2024-03-01T10:02:00Z", "c")],
                "t1",
            ))
            .mount(&server)
            .await;
        // The repeated event arrives with a different key order
        let second_page = r#"{
            "events": [
                {"uniqId": "c", "orgId": 42, "date": "2024-03-01T10:02:00Z", "eventType": "message_seen"},
                {"eventType": "message_seen", "date": "2024-03-01T10:01:00Z", "uniqId": "b", "orgId": 42}
            ],
            "nextPageToken": ""
        }"#;
        Mock::given(method("GET"))
            .and(path(MAIL_PATH))
            .and(query_param("pageToken", "t1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(second_page))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let outcome = client
            .audit_log_api(42)
            .fetch_events(AuditLogCategory::Mail, None, &FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.pages, 2);
        let uids: Vec<&str> = outcome
            .events
            .iter()
            .map(|e| e.raw["uniqId"].as_str().unwrap())
            .collect();
        assert_eq!(uids, vec!["b", "c", "d"]);
        let keys: HashSet<u64> = outcome.events.iter().map(|e| e.key).collect();
        assert_eq!(keys.len(), 3);
    }

    #[tokio::test]
    async fn test_page_budget_reanchors_with_before_date() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MAIL_PATH))
            .and(query_param_is_missing("pageToken"))
            .and(query_param_is_missing("beforeDate"))
            .respond_with(page(
                vec![
                    event("2024-03-01T10:06:00Z", "g"),
                    event("2024-03-01T10:05:00Z", "f"),
                    event("2024-03-01T10:04:00Z", "e"),
                ],
                "t1",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(MAIL_PATH))
            .and(query_param("pageToken", "t1"))
            .respond_with(page(
                vec![
                    event("2024-03-01T10:04:00Z", "e"),
                    event("2024-03-01T10:03:00Z", "d"),
                    event("2024-03-01T10:02:00Z", "c"),
                ],
                "t2",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(MAIL_PATH))
            .and(query_param("beforeDate", "2024-03-01T10:03:00Z"))
            .and(query_param_is_missing("pageToken"))
            .respond_with(page(
                vec![
                    event("2024-03-01T10:02:00Z", "c"),
                    event("2024-03-01T10:01:00Z", "b"),
                    event("2024-03-01T10:00:00Z", "a"),
                ],
                "",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let options = FetchOptions {
            max_token_pages: 1,
            reanchor_offset: 2,
            ..FetchOptions::default()
        };
        let client = test_client(&server);
        let outcome = client
            .audit_log_api(42)
            .fetch_events(AuditLogCategory::Mail, None, &options)
            .await
            .unwrap();

        assert_eq!(outcome.pages, 3);
        let uids: Vec<&str> = outcome
            .events
            .iter()
            .map(|e| e.raw["uniqId"].as_str().unwrap())
            .collect();
        assert_eq!(uids, vec!["a", "b", "c", "d", "e", "f", "g"]);
    }

    #[tokio::test]
    async fn test_stalled_reanchor_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MAIL_PATH))
            .respond_with(page(vec![event("2024-03-01T10:00:00Z", "a")], "again"))
            .mount(&server)
            .await;

        let options = FetchOptions {
            max_token_pages: 0,
            ..FetchOptions::default()
        };
        let client = test_client(&server);
        let result = client
            .audit_log_api(42)
            .fetch_events(AuditLogCategory::Mail, None, &options)
            .await;

        assert!(matches!(result, Err(Api360Error::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_an_error_not_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/security/v1/org/42/audit_log/disk"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result = client
            .audit_log_api(42)
            .fetch_events(AuditLogCategory::Disk, None, &FetchOptions::default())
            .await;

        assert!(matches!(result, Err(Api360Error::RetryExhausted(_))));
    }

    #[tokio::test]
    async fn test_no_new_events_is_empty_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MAIL_PATH))
            .respond_with(page(vec![], ""))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let outcome = client
            .audit_log_api(42)
            .fetch_events(AuditLogCategory::Mail, None, &FetchOptions::default())
            .await
            .unwrap();

        assert!(outcome.events.is_empty());
        assert_eq!(outcome.pages, 1);
    }

    #[tokio::test]
    async fn test_malformed_page_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MAIL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"items": []}"#))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result = client
            .audit_log_api(42)
            .fetch_events(AuditLogCategory::Mail, None, &FetchOptions::default())
            .await;

        assert!(matches!(result, Err(Api360Error::Serialization(_))));
    }
}
