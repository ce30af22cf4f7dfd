//! Core API client implementation.
//!
//! This module contains the HTTP client used by the audit-log endpoints:
//! OAuth header authentication, URL building and the retrying GET.

use log::{error, info, warn};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::time::{Duration, Instant};

use crate::audit_log::AuditLogApi;
use crate::{Api360Config, Api360Error};

/// Longest response body excerpt kept in error messages
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Core API client.
#[derive(Clone)]
pub struct Api360Client {
    config: Api360Config,
    client: Client,
}

impl Api360Client {
    /// Build URL with query parameters
    fn build_url_with_params(&self, endpoint: &str, query_params: &[(&str, String)]) -> String {
        let estimated_capacity = self
            .config
            .base_url
            .len()
            .saturating_add(endpoint.len())
            .saturating_add(query_params.len().saturating_mul(32));

        let mut url = String::with_capacity(estimated_capacity);
        url.push_str(&self.config.base_url);
        url.push_str(endpoint);

        if !query_params.is_empty() {
            url.push('?');
            for (i, (key, value)) in query_params.iter().enumerate() {
                if i > 0 {
                    url.push('&');
                }
                url.push_str(&urlencoding::encode(key));
                url.push('=');
                url.push_str(&urlencoding::encode(value));
            }
        }

        url
    }

    /// Create a new API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: Api360Config) -> Result<Self, Api360Error> {
        let mut client_builder = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .timeout(Duration::from_secs(config.request_timeout));

        if let Some(proxy_url) = &config.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Api360Error::InvalidConfig(format!("Invalid proxy URL: {e}")))?;
            client_builder = client_builder.proxy(proxy);
        }

        let client = client_builder.build().map_err(Api360Error::Http)?;
        Ok(Self { config, client })
    }

    /// Get the base URL for API requests.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Get access to the configuration
    #[must_use]
    pub fn config(&self) -> &Api360Config {
        &self.config
    }

    /// Get an audit-log API instance for one organization.
    #[must_use]
    pub fn audit_log_api(&self, org_id: u64) -> AuditLogApi<'_> {
        AuditLogApi::new(self, org_id)
    }

    /// Execute an HTTP request with retry logic and linear backoff.
    ///
    /// Non-success statuses and transport timeouts/connection failures are
    /// retried up to `retry_config.max_attempts` times, waiting
    /// `attempt * base_delay` before each retry. Other errors are returned
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns `RetryExhausted` once every attempt failed, or the first
    /// non-retryable error.
    async fn execute_with_retry<F>(
        &self,
        request_builder: F,
        operation_name: Cow<'_, str>,
    ) -> Result<reqwest::Response, Api360Error>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let retry_config = &self.config.retry_config;
        let start_time = Instant::now();
        let mut last_error = None;

        for attempt in 1..=retry_config.max_attempts.saturating_add(1) {
            let error = match request_builder().send().await {
                Ok(response) if response.status().is_success() => {
                    if attempt > 1 {
                        info!("{operation_name} succeeded on attempt {attempt}");
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body: String = response
                        .text()
                        .await
                        .unwrap_or_default()
                        .chars()
                        .take(MAX_ERROR_BODY_CHARS)
                        .collect();
                    error!("Error during {operation_name}: {status}. Error message: {body}");
                    Api360Error::Status { status, body }
                }
                Err(e) => Api360Error::Http(e),
            };

            if !retry_config.is_retryable_error(&error) {
                return Err(error);
            }

            if attempt > retry_config.max_attempts {
                last_error = Some(error);
                break;
            }

            let delay = retry_config.calculate_delay(attempt);
            warn!(
                "{operation_name} failed on attempt {attempt}, retrying ({attempt}/{}) in {}ms: {error}",
                retry_config.max_attempts,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            last_error = Some(error);
        }

        match last_error {
            Some(error) if retry_config.max_attempts == 0 => Err(error),
            Some(error) => Err(Api360Error::RetryExhausted(format!(
                "{} failed after {} attempts over {}ms: {}",
                operation_name,
                retry_config.max_attempts.saturating_add(1),
                start_time.elapsed().as_millis(),
                error
            ))),
            None => Err(Api360Error::RetryExhausted(format!(
                "{} failed after {} attempts with unknown error",
                operation_name,
                retry_config.max_attempts.saturating_add(1)
            ))),
        }
    }

    /// Make a GET request to the specified endpoint.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The API endpoint path (e.g., "/security/v1/org/1/audit_log/mail")
    /// * `query_params` - Query parameters as key-value pairs
    ///
    /// # Errors
    ///
    /// Returns an error if every attempt failed.
    pub async fn get(
        &self,
        endpoint: &str,
        query_params: &[(&str, String)],
    ) -> Result<reqwest::Response, Api360Error> {
        let url = self.build_url_with_params(endpoint, query_params);
        let auth_header = self.config.auth_header();

        let request_builder = || {
            self.client
                .get(&url)
                .header("Authorization", &auth_header)
                .header("Accept", "application/json")
        };

        let operation_name = if endpoint.len() < 64 {
            Cow::Owned(format!("GET {endpoint}"))
        } else {
            Cow::Borrowed("GET [long endpoint]")
        };
        self.execute_with_retry(request_builder, operation_name)
            .await
    }

    /// Make a GET request and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is not the expected JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, String)],
    ) -> Result<T, Api360Error> {
        let response = self.get(endpoint, query_params).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(Api360Error::from)
    }
}
