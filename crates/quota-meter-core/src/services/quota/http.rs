//! HTTP collaborators for the estimator
//!
//! - [`HttpUsageSource`] performs the authoritative account-usage read used by
//!   the sync timer.
//! - [`MeteredClient`] wraps the hosting application's own requests and
//!   forwards any `X-RateLimit-*` headers it sees to the estimator.
//!
//! Both authenticate with the browser-style session cookie; a 401/403 means
//! the session has expired.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use super::estimator::SharedEstimator;
use super::headers::RateLimitHeaders;
use super::provider::{QuotaError, UsageFetch, UsageSource};
use super::types::UsageReport;
use crate::config::MeterConfig;

// ============================================================================
// Constants
// ============================================================================

/// Authoritative account usage endpoint
pub const ACCOUNT_USAGE_PATH: &str = "/v1/auth/account-usage";

/// Session check endpoint (200 = logged in, 204 = no session)
pub const SESSION_PATH: &str = "/v1/auth/session";

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 8;

/// Map auth failures and other non-2xx statuses
fn check_status(status: StatusCode) -> Result<(), QuotaError> {
    match status {
        StatusCode::UNAUTHORIZED => Err(QuotaError::Unauthorized("Session expired".to_string())),
        StatusCode::FORBIDDEN => Err(QuotaError::Unauthorized("Access forbidden".to_string())),
        s if !s.is_success() => Err(QuotaError::ApiError(format!("HTTP {}", s))),
        _ => Ok(()),
    }
}

fn default_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_default()
}

// ============================================================================
// HttpUsageSource
// ============================================================================

/// Reads account usage from the server's REST API
pub struct HttpUsageSource {
    base_url: String,
    client: Client,
    session_cookie: Option<String>,
}

impl HttpUsageSource {
    /// Create a source for the given server origin (e.g. `https://api.example.com`)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, default_client())
    }

    /// Create a source with a preconfigured client
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client,
            session_cookie: None,
        }
    }

    /// Build a source from the loaded configuration
    pub fn from_config(config: &MeterConfig) -> Result<Self, QuotaError> {
        if config.server_url.trim().is_empty() {
            return Err(QuotaError::NotConfigured("server_url is empty".to_string()));
        }

        let mut source = Self::new(&config.server_url);
        if let Some(cookie) = &config.session_cookie {
            source = source.with_session_cookie(cookie.clone());
        }
        Ok(source)
    }

    /// Send this `Cookie` header value with every request
    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");

        match &self.session_cookie {
            Some(cookie) => request.header(COOKIE, cookie),
            None => request,
        }
    }
}

#[async_trait]
impl UsageSource for HttpUsageSource {
    fn source_id(&self) -> &'static str {
        "http"
    }

    async fn fetch_usage(&self) -> Result<UsageFetch, QuotaError> {
        log::debug!("[quota:http] GET {}{}", self.base_url, ACCOUNT_USAGE_PATH);

        let response = self.get(ACCOUNT_USAGE_PATH).send().await?;
        check_status(response.status())?;

        let headers = RateLimitHeaders::from_header_map(response.headers());
        let body = response.text().await?;
        let report: UsageReport = serde_json::from_str(&body)?;

        Ok(UsageFetch {
            report,
            rate_limit_headers: headers,
        })
    }

    async fn is_available(&self) -> bool {
        match self.get(SESSION_PATH).send().await {
            Ok(response) => {
                let status = response.status();
                let available = status.is_success() && status != StatusCode::NO_CONTENT;
                log::debug!(
                    "[quota:http] Session check returned {}, available={}",
                    status,
                    available
                );
                available
            }
            Err(e) => {
                log::debug!("[quota:http] Session check failed: {}", e);
                false
            }
        }
    }
}

// ============================================================================
// MeteredClient
// ============================================================================

/// Request wrapper for the hosting application
///
/// Every response passing through [`send`](Self::send) has its rate-limit
/// headers forwarded to the estimator.
#[derive(Clone)]
pub struct MeteredClient {
    client: Client,
    estimator: SharedEstimator,
    session_cookie: Option<String>,
}

impl MeteredClient {
    pub fn new(estimator: SharedEstimator) -> Self {
        Self::with_client(default_client(), estimator)
    }

    pub fn with_client(client: Client, estimator: SharedEstimator) -> Self {
        Self {
            client,
            estimator,
            session_cookie: None,
        }
    }

    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    /// Start a GET request with session and JSON headers applied
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.prepare(self.client.get(url))
    }

    /// Start a POST request with session and JSON headers applied
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.prepare(self.client.post(url))
    }

    fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(ACCEPT, "application/json");
        match &self.session_cookie {
            Some(cookie) => request.header(COOKIE, cookie),
            None => request,
        }
    }

    /// Execute a request, observing its rate-limit headers
    ///
    /// Non-2xx responses other than 401/403 are returned to the caller as-is.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, QuotaError> {
        let response = request.send().await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            log::info!("[quota:http] Session expired ({})", response.status());
            check_status(response.status())?;
        }

        if let Some(headers) = RateLimitHeaders::from_header_map(response.headers()) {
            let outcome = self
                .estimator
                .lock()
                .await
                .observe_rate_limit_headers(headers.limit, headers.remaining);
            log::trace!("[quota:http] Rate-limit headers {:?}: {:?}", headers, outcome);
        }

        Ok(response)
    }
}

// ============================================================================
// Tests
// ============================================================================
