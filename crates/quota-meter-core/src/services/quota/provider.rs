//! Usage source trait and error types
//!
//! Defines the interface that authoritative usage sources must implement.

use async_trait::async_trait;
use thiserror::Error;

use super::headers::RateLimitHeaders;
use super::types::UsageReport;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when fetching usage information
#[derive(Error, Debug)]
pub enum QuotaError {
    /// Source has no server URL or session configured
    #[error("Source not configured: {0}")]
    NotConfigured(String),

    /// Session is missing, expired or forbidden
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// API returned an error
    #[error("API error: {0}")]
    ApiError(String),

    /// Failed to parse API response
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Network request failed
    #[error("Network error: {0}")]
    NetworkError(String),

    /// General/unknown error
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for QuotaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QuotaError::NetworkError("Request timed out".to_string())
        } else if err.is_connect() {
            QuotaError::NetworkError("Connection failed".to_string())
        } else if err.is_decode() {
            QuotaError::ParseError(err.to_string())
        } else if err.is_status() {
            match err.status() {
                Some(status) if status.as_u16() == 401 => {
                    QuotaError::Unauthorized("Session expired".to_string())
                }
                Some(status) if status.as_u16() == 403 => {
                    QuotaError::Unauthorized("Access forbidden".to_string())
                }
                Some(status) => QuotaError::ApiError(format!("HTTP {}", status)),
                None => QuotaError::NetworkError(err.to_string()),
            }
        } else {
            QuotaError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for QuotaError {
    fn from(err: serde_json::Error) -> Self {
        QuotaError::ParseError(err.to_string())
    }
}

// ============================================================================
// Fetch Result
// ============================================================================

/// One authoritative read
///
/// The usage response itself may carry rate-limit headers; they are handed
/// back so the caller can feed them to the estimator before the report.
#[derive(Debug, Clone)]
pub struct UsageFetch {
    pub report: UsageReport,
    pub rate_limit_headers: Option<RateLimitHeaders>,
}

impl UsageFetch {
    pub fn new(report: UsageReport) -> Self {
        Self {
            report,
            rate_limit_headers: None,
        }
    }

    pub fn with_headers(mut self, headers: RateLimitHeaders) -> Self {
        self.rate_limit_headers = Some(headers);
        self
    }
}

// ============================================================================
// Source Trait
// ============================================================================

/// Trait for authoritative usage sources
///
/// Implement this trait to feed the sync timer from a new backend.
///
/// # Example Implementation
///
/// ```ignore
/// use async_trait::async_trait;
/// use quota_meter_core::services::quota::{QuotaError, UsageFetch, UsageReport, UsageSource};
///
/// struct FixedSource;
///
/// #[async_trait]
/// impl UsageSource for FixedSource {
///     fn source_id(&self) -> &'static str {
///         "fixed"
///     }
///
///     async fn fetch_usage(&self) -> Result<UsageFetch, QuotaError> {
///         Ok(UsageFetch::new(UsageReport::default()))
///     }
///
///     async fn is_available(&self) -> bool {
///         true
///     }
/// }
/// ```
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Unique identifier for this source, used in logs and status output
    fn source_id(&self) -> &'static str;

    /// Fetch the current account usage
    ///
    /// # Errors
    ///
    /// Returns `QuotaError` if:
    /// - The session is missing or expired (`Unauthorized`)
    /// - The request fails (`NetworkError`, `ApiError`)
    /// - The response cannot be parsed (`ParseError`)
    async fn fetch_usage(&self) -> Result<UsageFetch, QuotaError>;

    /// Check whether a user session is established
    ///
    /// The sync timer only starts when this returns `true`.
    async fn is_available(&self) -> bool;
}

// ============================================================================
// Tests
// ============================================================================
