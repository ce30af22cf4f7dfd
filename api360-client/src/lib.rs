//! # Yandex 360 Audit Log API Client
//!
//! A small async client for the security audit-log endpoints of the Yandex 360
//! API (`/security/v1/org/{orgId}/audit_log/{mail|disk}`).
//!
//! The crate handles OAuth header authentication, bounded retries with linear
//! backoff, and the pagination quirks of the audit-log endpoints: continuation
//! tokens with a capped depth, re-anchoring by upper time bound, and
//! content-based deduplication of events that are returned more than once.
//!
//! ## Quick Start
//!
//! ```no_run
//! use api360_client::{Api360Client, Api360Config, AuditLogCategory, FetchOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Api360Config::new("oauth-token".to_string());
//!     let client = Api360Client::new(config)?;
//!
//!     let outcome = client
//!         .audit_log_api(12345)
//!         .fetch_events(AuditLogCategory::Mail, None, &FetchOptions::default())
//!         .await?;
//!
//!     println!("{} new mail events", outcome.events.len());
//!     Ok(())
//! }
//! ```

pub mod audit_log;
pub mod client;

use reqwest::Error as ReqwestError;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// Re-export common types for convenience
pub use audit_log::{AuditLogApi, AuditLogCategory, AuditLogPage, FetchOptions, FetchOutcome, FetchedEvent};
pub use client::Api360Client;

/// Default public endpoint of the Yandex 360 API
pub const DEFAULT_API_URL: &str = "https://api360.yandex.net";

/// Custom error type for audit-log API operations.
#[derive(Debug)]
pub enum Api360Error {
    /// HTTP request failed at the transport level
    Http(ReqwestError),
    /// JSON serialization/deserialization failed
    Serialization(serde_json::Error),
    /// Configuration is invalid
    InvalidConfig(String),
    /// API returned a response that could not be used
    InvalidResponse(String),
    /// API answered with a non-success status
    Status { status: u16, body: String },
    /// All retry attempts were used up
    RetryExhausted(String),
}

impl fmt::Display for Api360Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Api360Error::Http(e) => write!(f, "HTTP error: {e}"),
            Api360Error::Serialization(e) => write!(f, "Serialization error: {e}"),
            Api360Error::InvalidConfig(e) => write!(f, "Invalid configuration: {e}"),
            Api360Error::InvalidResponse(e) => write!(f, "Invalid response: {e}"),
            Api360Error::Status { status, body } => write!(f, "HTTP status {status}: {body}"),
            Api360Error::RetryExhausted(e) => write!(f, "Retries exhausted: {e}"),
        }
    }
}

impl std::error::Error for Api360Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Api360Error::Http(e) => Some(e),
            Api360Error::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ReqwestError> for Api360Error {
    fn from(error: ReqwestError) -> Self {
        Api360Error::Http(error)
    }
}

impl From<serde_json::Error> for Api360Error {
    fn from(error: serde_json::Error) -> Self {
        Api360Error::Serialization(error)
    }
}

/// Retry policy for API requests.
///
/// Delays grow linearly: the wait before retry `n` is `n * base_delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Number of retries after the first attempt (0 disables retrying)
    pub max_attempts: u32,
    /// Delay unit in milliseconds
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
        }
    }
}

impl RetryConfig {
    /// Create a retry policy with the given attempt count and delay unit
    #[must_use]
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
        }
    }

    /// Delay to wait before retry number `attempt` (1-based)
    #[must_use]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt)))
    }

    /// Whether a failed request is worth another attempt
    #[must_use]
    pub fn is_retryable_error(&self, error: &Api360Error) -> bool {
        match error {
            Api360Error::Http(e) => e.is_timeout() || e.is_connect(),
            Api360Error::Status { .. } => true,
            Api360Error::Serialization(_)
            | Api360Error::InvalidConfig(_)
            | Api360Error::InvalidResponse(_)
            | Api360Error::RetryExhausted(_) => false,
        }
    }
}

/// Configuration for the API client.
#[derive(Debug, Clone)]
pub struct Api360Config {
    /// OAuth token sent in the `Authorization` header
    token: Arc<SecretString>,
    /// Base URL without trailing slash
    pub base_url: String,
    /// Connect timeout in seconds
    pub connect_timeout: u64,
    /// Whole-request timeout in seconds
    pub request_timeout: u64,
    /// Optional HTTP(S) proxy
    pub proxy_url: Option<String>,
    /// Retry policy for GET requests
    pub retry_config: RetryConfig,
}

impl Api360Config {
    /// Create a configuration for the public endpoint.
    #[must_use]
    pub fn new(token: String) -> Self {
        Self {
            token: Arc::new(SecretString::new(token.into())),
            base_url: DEFAULT_API_URL.to_string(),
            connect_timeout: 30,
            request_timeout: 300,
            proxy_url: None,
            retry_config: RetryConfig::default(),
        }
    }

    /// Point the client at another server (tests, mirrors).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set connect and request timeouts in seconds.
    #[must_use]
    pub fn with_timeouts(mut self, connect_timeout: u64, request_timeout: u64) -> Self {
        self.connect_timeout = connect_timeout;
        self.request_timeout = request_timeout;
        self
    }

    /// Route every request through a proxy.
    #[must_use]
    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Value of the `Authorization` header
    pub(crate) fn auth_header(&self) -> String {
        format!("OAuth {}", self.token.expose_secret())
    }
}
