//! Quota tracking types
//!
//! Types for the authoritative server view of account quota usage and the
//! predicted view shown to the user between server reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ============================================================================
// Snapshot Types
// ============================================================================

/// Where an accepted quota fact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    /// Periodic read of the account-usage endpoint
    Poll,
    /// Passively observed `X-RateLimit-*` response headers
    Headers,
}

impl std::fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotSource::Poll => write!(f, "poll"),
            SnapshotSource::Headers => write!(f, "headers"),
        }
    }
}

/// The authoritative quota fact as last known from the server
///
/// Replaced wholesale whenever a new authoritative read is accepted.
/// `remaining_requests` is always derived from `rate_limit - used_requests`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    /// Requests consumed in the current window
    pub used_requests: u64,
    /// Quota ceiling for the current window (always > 0)
    pub rate_limit: u64,
    /// Requests left in the current window
    pub remaining_requests: u64,
    /// When this fact was obtained
    pub observed_at: DateTime<Utc>,
    /// Which channel delivered it
    pub source: SnapshotSource,
    /// When the server says the window resets, if it told us
    pub resets_at: Option<DateTime<Utc>>,
}

impl QuotaSnapshot {
    /// Create a snapshot observed now
    ///
    /// Callers must have validated `used_requests <= rate_limit` and `rate_limit > 0`.
    pub fn new(used_requests: u64, rate_limit: u64, source: SnapshotSource) -> Self {
        Self {
            used_requests,
            rate_limit,
            remaining_requests: rate_limit.saturating_sub(used_requests),
            observed_at: Utc::now(),
            source,
            resets_at: None,
        }
    }

    /// Set the window reset time, if the server reported one
    pub fn with_resets_at(mut self, resets_at: Option<DateTime<Utc>>) -> Self {
        self.resets_at = resets_at;
        self
    }
}

// ============================================================================
// Predicted State
// ============================================================================

/// The value currently shown to the user
///
/// Invariant: `current_used <= rate_limit` and
/// `current_remaining == rate_limit - current_used`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictedState {
    pub current_used: u64,
    pub current_remaining: u64,
    pub rate_limit: u64,
}

impl PredictedState {
    /// Build a state from a (possibly fractional) used count, clamping into range
    pub fn from_used(used: f64, rate_limit: u64) -> Self {
        let rate_limit = rate_limit.max(1);
        let current_used = if used.is_finite() {
            (used.round().max(0.0) as u64).min(rate_limit)
        } else {
            0
        };

        Self {
            current_used,
            current_remaining: rate_limit - current_used,
            rate_limit,
        }
    }

    /// Percentage of the quota used, clamped to `[0, 100]`
    pub fn percentage(&self) -> f64 {
        if self.rate_limit == 0 {
            return 0.0;
        }
        (self.current_used as f64 / self.rate_limit as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Alert level for this state under the given thresholds
    pub fn alert_level(&self, warning_threshold: f64, critical_threshold: f64) -> AlertLevel {
        AlertLevel::from_usage(self.percentage(), warning_threshold, critical_threshold)
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle of an estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Ticking and syncing (host visible, session established)
    Active,
    /// No ticking, no syncing (host hidden or not yet started)
    Suspended,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lifecycle::Active => write!(f, "active"),
            Lifecycle::Suspended => write!(f, "suspended"),
        }
    }
}

// ============================================================================
// Operation Outcomes
// ============================================================================

/// What an authoritative snapshot did to the predicted state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Near agreement: predicted state now equals the snapshot
    Snapped,
    /// Large drift: predicted state moved part of the way
    Blended,
    /// Input failed validation and was counted
    Rejected,
    /// Too many consecutive invalid inputs: estimator reset to zero usage
    Reset,
}

/// What a rate-limit header observation did to the predicted state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderOutcome {
    Applied,
    /// Limit below the account tier threshold (another resource's limit)
    IgnoredTier,
    /// Negative values, unparseable values or `remaining > limit`
    IgnoredInvalid,
    /// Would move displayed usage backwards
    IgnoredStale,
}

// ============================================================================
// Server Payload
// ============================================================================

/// Account usage payload from `GET /v1/auth/account-usage`
///
/// All fields are optional on the wire; validation happens in the estimator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub account_requests_used: Option<i64>,
    #[serde(default)]
    pub account_rate_limit: Option<i64>,
    #[serde(default)]
    pub remaining_requests: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lenient_timestamp")]
    pub rate_limit_reset_time: Option<DateTime<Utc>>,
    /// Server-computed percentage; ignored in favour of our own computation
    #[serde(default)]
    pub usage_percentage: Option<f64>,
    #[serde(default)]
    pub key_usage_breakdown: Vec<KeyUsage>,
}

/// Per-API-key share of the account usage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyUsage {
    #[serde(default)]
    pub key_id: Option<i64>,
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub key_name: Option<String>,
    #[serde(default)]
    pub request_count: Option<i64>,
    #[serde(default)]
    pub percentage_of_total: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_timestamp")]
    pub last_used: Option<DateTime<Utc>>,
}

/// Integer timestamps at or above this are epoch milliseconds
const EPOCH_MILLIS_CUTOFF: u64 = 100_000_000_000;

/// Timestamps arrive as RFC 3339 strings or as epoch seconds (integer or
/// fractional); anything else becomes `None` instead of failing the report.
fn deserialize_lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}

/// Parse a JSON timestamp in any of the forms the server emits
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => {
            if let Some(whole) = n.as_i64() {
                return if whole.unsigned_abs() >= EPOCH_MILLIS_CUTOFF {
                    DateTime::from_timestamp_millis(whole)
                } else {
                    DateTime::from_timestamp(whole, 0)
                };
            }
            let secs = n.as_f64()?;
            if !secs.is_finite() {
                return None;
            }
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
            DateTime::from_timestamp(whole as i64, nanos)
        }
        _ => None,
    }
}

// ============================================================================
// Alert Level
// ============================================================================

/// Alert level for quota usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Normal usage, no alert
    Normal,
    /// Usage is approaching limit (e.g., >80%)
    Warning,
    /// Usage is at or near limit (e.g., >95%)
    Critical,
}

impl AlertLevel {
    /// Determine alert level based on usage percentage and thresholds
    pub fn from_usage(used_percent: f64, warning_threshold: f64, critical_threshold: f64) -> Self {
        if used_percent >= critical_threshold {
            AlertLevel::Critical
        } else if used_percent >= warning_threshold {
            AlertLevel::Warning
        } else {
            AlertLevel::Normal
        }
    }
}

/// Thresholds used to classify the displayed percentage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Percentage at which to show warning (0-100)
    pub warning: f64,
    /// Percentage at which to show critical (0-100)
    pub critical: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            warning: 80.0,
            critical: 95.0,
        }
    }
}

impl AlertThresholds {
    /// Clamp both thresholds into `[0, 100]`
    pub fn validate(&self) -> Self {
        Self {
            warning: self.warning.clamp(0.0, 100.0),
            critical: self.critical.clamp(0.0, 100.0),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
