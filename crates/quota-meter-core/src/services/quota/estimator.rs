//! Quota usage estimator
//!
//! Keeps a live predicted view of account quota usage between authoritative
//! server reads. Two asynchronous inputs feed it:
//!
//! - authoritative snapshots from the periodic account-usage poll
//! - `X-RateLimit-*` headers observed on unrelated responses
//!
//! Between inputs the predicted usage decays toward zero at the quota's
//! refill rate (`rate_limit / window_seconds`), so the displayed value counts
//! down instead of going stale.
//!
//! None of the operations fail. Invalid input is ignored (and, for snapshots,
//! counted); the displayed state always satisfies
//! `0 <= current_used <= rate_limit`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::headers::RateLimitHeaders;
use super::types::{
    HeaderOutcome, Lifecycle, PredictedState, QuotaSnapshot, SnapshotOutcome, SnapshotSource,
    UsageReport,
};

// ============================================================================
// Constants
// ============================================================================

/// Quota window length for an hourly quota
pub const DEFAULT_WINDOW_SECONDS: u64 = 3600;

/// Deltas at or below this snap instead of blending
pub const DEFAULT_SMALL_DELTA_THRESHOLD: u64 = 5;

/// Fraction of a large delta applied per reconciliation
pub const DEFAULT_BLEND_FACTOR: f64 = 0.3;

/// Header limits below this belong to another rate-limited resource
pub const DEFAULT_TIER_THRESHOLD: u64 = 5000;

/// Consecutive invalid snapshots tolerated before a fail-safe reset
pub const DEFAULT_MAX_INVALID_INPUTS: u32 = 5;

/// Limit assumed before the first snapshot arrives
pub const DEFAULT_RATE_LIMIT: u64 = 10_000;

/// Fastest decay cadence
pub const MIN_TICK_MS: u64 = 100;

/// Slowest decay cadence
pub const MAX_TICK_MS: u64 = 10_000;

/// Allowed disagreement between a supplied and a computed `remaining`
const REMAINING_TOLERANCE: i64 = 1;

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for the estimator
///
/// Reconciliation and tier values are heuristics, not correctness bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Quota window used to derive the refill rate
    pub window_seconds: u64,
    /// Deltas at or below this snap immediately
    pub small_delta_threshold: u64,
    /// Fraction of a large delta applied per reconciliation (0, 1]
    pub blend_factor: f64,
    /// Header limits below this are ignored as another tier
    pub tier_threshold: u64,
    /// Consecutive invalid snapshots before resetting to zero usage
    pub max_invalid_inputs: u32,
    /// Limit assumed until the first snapshot
    pub default_rate_limit: u64,
    /// Lower bound of the decay cadence in milliseconds
    pub min_tick_ms: u64,
    /// Upper bound of the decay cadence in milliseconds
    pub max_tick_ms: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_WINDOW_SECONDS,
            small_delta_threshold: DEFAULT_SMALL_DELTA_THRESHOLD,
            blend_factor: DEFAULT_BLEND_FACTOR,
            tier_threshold: DEFAULT_TIER_THRESHOLD,
            max_invalid_inputs: DEFAULT_MAX_INVALID_INPUTS,
            default_rate_limit: DEFAULT_RATE_LIMIT,
            min_tick_ms: MIN_TICK_MS,
            max_tick_ms: MAX_TICK_MS,
        }
    }
}

impl EstimatorConfig {
    /// Validate and normalize the configuration
    pub fn validate(&self) -> Self {
        let blend_factor = if self.blend_factor.is_finite() && self.blend_factor > 0.0 {
            self.blend_factor.min(1.0)
        } else {
            DEFAULT_BLEND_FACTOR
        };
        let min_tick_ms = self.min_tick_ms.max(1);

        Self {
            window_seconds: self.window_seconds.max(1),
            small_delta_threshold: self.small_delta_threshold,
            blend_factor,
            tier_threshold: self.tier_threshold.max(1),
            max_invalid_inputs: self.max_invalid_inputs.max(1),
            default_rate_limit: self.default_rate_limit.max(1),
            min_tick_ms,
            max_tick_ms: self.max_tick_ms.max(min_tick_ms),
        }
    }
}

// ============================================================================
// Callback & Shared Types
// ============================================================================

/// Callback invoked whenever the visible predicted state changes
///
/// Runs synchronously inside the estimator; it must not try to lock the
/// estimator it is registered on.
pub type StateChangeCallback = Box<dyn Fn(&PredictedState) + Send + Sync>;

/// Shared estimator for access from timer tasks and request wrappers
pub type SharedEstimator = Arc<Mutex<QuotaEstimator>>;

/// Create a new shared estimator
pub fn create_shared_estimator(config: EstimatorConfig) -> SharedEstimator {
    Arc::new(Mutex::new(QuotaEstimator::new(config)))
}

// ============================================================================
// Estimator
// ============================================================================

/// Predicts account quota usage between authoritative reads
pub struct QuotaEstimator {
    config: EstimatorConfig,
    /// Last accepted authoritative fact
    snapshot: Option<QuotaSnapshot>,
    rate_limit: u64,
    /// Fractional so decay accumulates across short ticks
    predicted_used: f64,
    lifecycle: Lifecycle,
    /// Decay is applied from this instant forward
    decay_baseline: Instant,
    /// Consecutive invalid authoritative inputs
    invalid_inputs: u32,
    /// Last state handed to the callback
    published: PredictedState,
    on_state_change: Option<StateChangeCallback>,
}

impl Default for QuotaEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

impl QuotaEstimator {
    /// Create a suspended estimator with zero usage
    pub fn new(config: EstimatorConfig) -> Self {
        let config = config.validate();
        let rate_limit = config.default_rate_limit;

        Self {
            config,
            snapshot: None,
            rate_limit,
            predicted_used: 0.0,
            lifecycle: Lifecycle::Suspended,
            decay_baseline: Instant::now(),
            invalid_inputs: 0,
            published: PredictedState::from_used(0.0, rate_limit),
            on_state_change: None,
        }
    }

    /// Register the render sink
    pub fn set_on_state_change(&mut self, callback: StateChangeCallback) {
        self.on_state_change = Some(callback);
    }

    /// Builder form of [`set_on_state_change`](Self::set_on_state_change)
    pub fn with_on_state_change(mut self, callback: StateChangeCallback) -> Self {
        self.on_state_change = Some(callback);
        self
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }

    /// Last accepted authoritative fact, if any
    pub fn snapshot(&self) -> Option<&QuotaSnapshot> {
        self.snapshot.as_ref()
    }

    /// Consecutive invalid authoritative inputs seen so far
    pub fn invalid_input_count(&self) -> u32 {
        self.invalid_inputs
    }

    /// Read-only view for rendering
    pub fn current_state(&self) -> PredictedState {
        PredictedState::from_used(self.predicted_used, self.rate_limit)
    }

    /// Requests freed per second by the rolling window
    pub fn refill_rate(&self) -> f64 {
        self.rate_limit as f64 / self.config.window_seconds as f64
    }

    /// Decay cadence: roughly one request of refill per tick, bounded
    pub fn tick_interval(&self) -> Duration {
        let min = self.config.min_tick_ms as f64;
        let max = self.config.max_tick_ms as f64;
        let ms = 1000.0 * self.config.window_seconds as f64 / self.rate_limit.max(1) as f64;
        Duration::from_millis(ms.round().clamp(min, max) as u64)
    }

    // ------------------------------------------------------------------------
    // Authoritative snapshots
    // ------------------------------------------------------------------------

    /// Ingest an authoritative usage reading
    pub fn ingest_authoritative_snapshot(
        &mut self,
        used: i64,
        limit: i64,
        remaining: Option<i64>,
    ) -> SnapshotOutcome {
        self.ingest_authoritative_snapshot_at(used, limit, remaining, Instant::now())
    }

    pub fn ingest_authoritative_snapshot_at(
        &mut self,
        used: i64,
        limit: i64,
        remaining: Option<i64>,
        now: Instant,
    ) -> SnapshotOutcome {
        self.ingest(used, limit, remaining, None, now)
    }

    /// Ingest a server payload; missing used/limit fields count as invalid
    pub fn ingest_report(&mut self, report: &UsageReport) -> SnapshotOutcome {
        self.ingest_report_at(report, Instant::now())
    }

    pub fn ingest_report_at(&mut self, report: &UsageReport, now: Instant) -> SnapshotOutcome {
        match (report.account_requests_used, report.account_rate_limit) {
            (Some(used), Some(limit)) => self.ingest(
                used,
                limit,
                report.remaining_requests,
                report.rate_limit_reset_time,
                now,
            ),
            _ => {
                log::debug!("[quota:estimator] Usage report missing used/limit fields");
                self.record_invalid(now)
            }
        }
    }

    fn ingest(
        &mut self,
        used: i64,
        limit: i64,
        remaining: Option<i64>,
        resets_at: Option<DateTime<Utc>>,
        now: Instant,
    ) -> SnapshotOutcome {
        let Some(snapshot) = validate_snapshot(used, limit, remaining) else {
            log::debug!(
                "[quota:estimator] Rejected snapshot used={} limit={} remaining={:?}",
                used,
                limit,
                remaining
            );
            return self.record_invalid(now);
        };
        let snapshot = snapshot.with_resets_at(resets_at);

        self.invalid_inputs = 0;
        let outcome = self.reconcile(&snapshot);
        self.snapshot = Some(snapshot);
        self.decay_baseline = now;
        self.publish();

        log::debug!(
            "[quota:estimator] Snapshot {:?}: predicted {}/{}",
            outcome,
            self.current_state().current_used,
            self.rate_limit
        );
        outcome
    }

    /// Move the prediction toward a fresh snapshot
    fn reconcile(&mut self, snapshot: &QuotaSnapshot) -> SnapshotOutcome {
        self.rate_limit = snapshot.rate_limit;

        let target = snapshot.used_requests as f64;
        let delta = target - self.predicted_used;
        let outcome = if delta.abs() <= self.config.small_delta_threshold as f64 {
            self.predicted_used = target;
            SnapshotOutcome::Snapped
        } else {
            self.predicted_used += delta * self.config.blend_factor;
            SnapshotOutcome::Blended
        };

        self.clamp_prediction();
        outcome
    }

    fn record_invalid(&mut self, now: Instant) -> SnapshotOutcome {
        self.invalid_inputs += 1;
        if self.invalid_inputs >= self.config.max_invalid_inputs {
            log::warn!(
                "[quota:estimator] {} consecutive invalid snapshots, resetting to zero usage",
                self.invalid_inputs
            );
            self.reset_to_default(now);
            return SnapshotOutcome::Reset;
        }
        SnapshotOutcome::Rejected
    }

    /// Fail-safe state: zero usage under the last known limit
    fn reset_to_default(&mut self, now: Instant) {
        self.snapshot = None;
        self.predicted_used = 0.0;
        self.invalid_inputs = 0;
        self.decay_baseline = now;
        self.publish();
    }

    // ------------------------------------------------------------------------
    // Header side-channel
    // ------------------------------------------------------------------------

    /// Observe a rate-limit header pair from an unrelated response
    pub fn observe_rate_limit_headers(&mut self, limit: i64, remaining: i64) -> HeaderOutcome {
        self.observe_headers_at(RateLimitHeaders::new(limit, remaining), Instant::now())
    }

    /// Observe raw header strings; unparseable values are ignored
    pub fn observe_header_values(&mut self, limit: &str, remaining: &str) -> HeaderOutcome {
        match RateLimitHeaders::parse(limit, remaining) {
            Some(headers) => self.observe_headers_at(headers, Instant::now()),
            None => HeaderOutcome::IgnoredInvalid,
        }
    }

    /// Observe whatever rate-limit headers a response carried
    pub fn observe_header_map(&mut self, headers: &HeaderMap) -> HeaderOutcome {
        match RateLimitHeaders::from_header_map(headers) {
            Some(headers) => self.observe_headers_at(headers, Instant::now()),
            None => HeaderOutcome::IgnoredInvalid,
        }
    }

    pub fn observe_headers_at(&mut self, headers: RateLimitHeaders, now: Instant) -> HeaderOutcome {
        let Some(used) = headers.used() else {
            return HeaderOutcome::IgnoredInvalid;
        };
        let limit = headers.limit as u64;

        if limit < self.config.tier_threshold {
            return HeaderOutcome::IgnoredTier;
        }

        // Headers corroborate, they never move the display backwards
        if used < self.current_state().current_used {
            return HeaderOutcome::IgnoredStale;
        }

        self.rate_limit = limit;
        self.predicted_used = used as f64;
        self.snapshot = Some(QuotaSnapshot::new(used, limit, SnapshotSource::Headers));
        self.decay_baseline = now;
        self.publish();

        log::trace!("[quota:estimator] Applied headers used={} limit={}", used, limit);
        HeaderOutcome::Applied
    }

    // ------------------------------------------------------------------------
    // Decay & lifecycle
    // ------------------------------------------------------------------------

    /// Advance the decay model to now
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        if !self.is_active() {
            return;
        }
        self.apply_decay(now);
        self.publish();
    }

    fn apply_decay(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.decay_baseline);
        if self.predicted_used > 0.0 {
            let decay = self.refill_rate() * elapsed.as_secs_f64();
            self.predicted_used = (self.predicted_used - decay).max(0.0);
        }
        self.decay_baseline = now;
    }

    /// Stop ticking (host hidden)
    pub fn suspend(&mut self) {
        self.suspend_at(Instant::now());
    }

    pub fn suspend_at(&mut self, now: Instant) {
        if self.lifecycle == Lifecycle::Suspended {
            return;
        }
        self.apply_decay(now);
        self.lifecycle = Lifecycle::Suspended;
        self.publish();
        log::debug!("[quota:estimator] Suspended");
    }

    /// Resume ticking (host visible again)
    ///
    /// The suspended interval is excluded from decay.
    pub fn resume(&mut self) {
        self.resume_at(Instant::now());
    }

    pub fn resume_at(&mut self, now: Instant) {
        if self.lifecycle == Lifecycle::Active {
            return;
        }
        self.lifecycle = Lifecycle::Active;
        self.decay_baseline = now;
        log::debug!("[quota:estimator] Resumed");
    }

    // ------------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------------

    fn clamp_prediction(&mut self) {
        self.predicted_used = self.predicted_used.clamp(0.0, self.rate_limit as f64);
    }

    /// Notify the render sink if the visible values changed
    fn publish(&mut self) {
        let state = self.current_state();
        if state == self.published {
            return;
        }
        self.published = state;
        if let Some(callback) = &self.on_state_change {
            callback(&state);
        }
    }
}

/// Check an authoritative reading and build a snapshot from it
///
/// A supplied `remaining` that disagrees with `limit - used` is discarded in
/// favour of the computed value.
fn validate_snapshot(used: i64, limit: i64, remaining: Option<i64>) -> Option<QuotaSnapshot> {
    if used < 0 || limit <= 0 || used > limit {
        return None;
    }
    let computed = limit - used;
    if let Some(remaining) = remaining {
        if remaining < 0 {
            return None;
        }
        if (remaining - computed).abs() > REMAINING_TOLERANCE {
            log::debug!(
                "[quota:estimator] remaining={} disagrees with limit-used={}, using computed",
                remaining,
                computed
            );
        }
    }
    Some(QuotaSnapshot::new(used as u64, limit as u64, SnapshotSource::Poll))
}

// ============================================================================
// Tests
// ============================================================================
