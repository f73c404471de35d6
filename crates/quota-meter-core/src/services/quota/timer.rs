//! Quota meter timers
//!
//! Background service that drives a [`QuotaEstimator`] with two independent
//! timers while the host is visible.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     QuotaMeterService                        │
//! │                                                             │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐  │
//! │  │ Decay loop   │    │ Sync loop    │    │ SyncStatus   │  │
//! │  │ - cadence()  │    │ - interval   │    │ - last_sync  │  │
//! │  │ - tick()     │    │ - fetch()    │    │ - last_error │  │
//! │  └──────────────┘    └──────────────┘    └──────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!           │                    │
//!           ▼                    ▼
//!    ┌──────────────┐     ┌──────────────┐
//!    │ Estimator    │◄────│ UsageSource  │
//!    │ (callback)   │     │ (HTTP)       │
//!    └──────────────┘     └──────────────┘
//! ```
//!
//! # Features
//!
//! - Decay cadence follows the refill rate (100ms to 10s)
//! - Fixed sync cadence (default 10 seconds), first sync immediate
//! - Suspend/resume on host visibility without a catch-up decay burst
//! - Teardown joins both timer tasks; nothing fires afterwards

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};

use super::estimator::{
    create_shared_estimator, EstimatorConfig, SharedEstimator, StateChangeCallback,
};
use super::provider::{QuotaError, UsageSource};
use super::types::{PredictedState, SnapshotOutcome};

// ============================================================================
// Constants
// ============================================================================

/// Minimum sync interval in seconds
pub const MIN_SYNC_INTERVAL_SECS: u64 = 1;

/// Default sync interval in seconds
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the sync timer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Whether the authoritative sync timer runs at all
    pub enabled: bool,
    /// Sync interval in seconds (minimum 1)
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}

impl SyncConfig {
    /// Create a new configuration with the specified interval
    pub fn with_interval(interval_secs: u64) -> Self {
        Self {
            interval_secs: interval_secs.max(MIN_SYNC_INTERVAL_SECS),
            ..Default::default()
        }
    }

    /// Validate and normalize the configuration
    pub fn validate(&self) -> Self {
        Self {
            enabled: self.enabled,
            interval_secs: self.interval_secs.max(MIN_SYNC_INTERVAL_SECS),
        }
    }
}

// ============================================================================
// Sync Status
// ============================================================================

/// Status of the sync timer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Whether the timers are currently running
    pub is_running: bool,
    /// Whether a fetch is currently in flight
    pub is_syncing: bool,
    /// Last sync timestamp (ISO 8601)
    pub last_sync_at: Option<String>,
    /// Next scheduled sync timestamp (ISO 8601)
    pub next_sync_at: Option<String>,
    /// Last error message (if any)
    pub last_error: Option<String>,
    /// Failed syncs since the last success
    pub consecutive_failures: u32,
    /// Successful syncs since construction
    pub syncs_completed: u64,
}

impl SyncStatus {
    fn start(&mut self, interval_secs: u64) {
        self.is_running = true;
        self.update_next_sync_time(interval_secs);
    }

    fn stop(&mut self) {
        self.is_running = false;
        self.is_syncing = false;
        self.next_sync_at = None;
    }

    fn begin_sync(&mut self) {
        self.is_syncing = true;
    }

    fn complete_sync(&mut self, error: Option<String>, interval_secs: u64) {
        self.is_syncing = false;
        self.last_sync_at = Some(chrono::Utc::now().to_rfc3339());
        match &error {
            Some(_) => self.consecutive_failures += 1,
            None => {
                self.consecutive_failures = 0;
                self.syncs_completed += 1;
            }
        }
        self.last_error = error;
        self.update_next_sync_time(interval_secs);
    }

    fn update_next_sync_time(&mut self, interval_secs: u64) {
        if self.is_running {
            let next = chrono::Utc::now() + chrono::Duration::seconds(interval_secs as i64);
            self.next_sync_at = Some(next.to_rfc3339());
        }
    }
}

/// Shared status wrapper for thread-safe access
pub type SharedSyncStatus = Arc<RwLock<SyncStatus>>;

// ============================================================================
// Service
// ============================================================================

/// Handles for the two timer tasks
struct TimerTasks {
    shutdown_tx: watch::Sender<bool>,
    decay: JoinHandle<()>,
    sync: Option<JoinHandle<()>>,
}

impl TimerTasks {
    fn abort(&self) {
        let _ = self.shutdown_tx.send(true);
        self.decay.abort();
        if let Some(sync) = &self.sync {
            sync.abort();
        }
    }

    async fn join(self) {
        self.abort();
        let _ = self.decay.await;
        if let Some(sync) = self.sync {
            let _ = sync.await;
        }
    }
}

/// Drives an estimator with decay and sync timers
///
/// Construct on view mount, call [`start`](Self::start) once a session is
/// established, map host visibility onto [`set_visible`](Self::set_visible)
/// and call [`shutdown`](Self::shutdown) on unmount.
pub struct QuotaMeterService {
    estimator: SharedEstimator,
    source: Arc<dyn UsageSource>,
    config: SyncConfig,
    status: SharedSyncStatus,
    tasks: StdMutex<Option<TimerTasks>>,
    /// Serializes start/suspend/resume so task handles and status agree
    lifecycle: Mutex<()>,
    closed: AtomicBool,
}

impl QuotaMeterService {
    /// Create a service with a fresh estimator
    pub fn new(
        estimator_config: EstimatorConfig,
        sync_config: SyncConfig,
        source: Arc<dyn UsageSource>,
    ) -> Self {
        Self::with_estimator(create_shared_estimator(estimator_config), sync_config, source)
    }

    /// Create a service around an existing shared estimator
    pub fn with_estimator(
        estimator: SharedEstimator,
        sync_config: SyncConfig,
        source: Arc<dyn UsageSource>,
    ) -> Self {
        Self {
            estimator,
            source,
            config: sync_config.validate(),
            status: Arc::new(RwLock::new(SyncStatus::default())),
            tasks: StdMutex::new(None),
            lifecycle: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// The estimator this service drives
    pub fn estimator(&self) -> SharedEstimator {
        Arc::clone(&self.estimator)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Register the render sink on the underlying estimator
    pub async fn set_on_state_change(&self, callback: StateChangeCallback) {
        self.estimator.lock().await.set_on_state_change(callback);
    }

    /// Current predicted state
    pub async fn current_state(&self) -> PredictedState {
        self.estimator.lock().await.current_state()
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Whether the timers are running
    pub fn is_running(&self) -> bool {
        self.tasks
            .lock()
            .map(|tasks| tasks.is_some())
            .unwrap_or(false)
    }

    /// Start the timers once a user session is established
    ///
    /// # Errors
    ///
    /// Returns `QuotaError::Unauthorized` when the source reports no session,
    /// and `QuotaError::Other` after [`shutdown`](Self::shutdown).
    pub async fn start(&self) -> Result<(), QuotaError> {
        let _guard = self.lifecycle.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(QuotaError::Other("Service has been shut down".to_string()));
        }
        if self.is_running() {
            log::info!("[quota:timer] Timers already running");
            return Ok(());
        }

        if !self.source.is_available().await {
            log::warn!(
                "[quota:timer] No session for source {}, not starting",
                self.source.source_id()
            );
            return Err(QuotaError::Unauthorized(
                "No user session established".to_string(),
            ));
        }

        self.activate().await;
        Ok(())
    }

    /// Stop both timers (host hidden); the estimator stops ticking
    pub async fn suspend(&self) {
        let _guard = self.lifecycle.lock().await;
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => tasks.take(),
            Err(_) => None,
        };

        // Suspend under the lock first so a fetch finishing mid-shutdown is dropped
        self.estimator.lock().await.suspend();
        self.status.write().await.stop();

        if let Some(tasks) = tasks {
            tasks.join().await;
            log::info!("[quota:timer] Timers stopped");
        }
    }

    /// Restart the timers (host visible again)
    pub async fn resume(&self) {
        let _guard = self.lifecycle.lock().await;
        if self.closed.load(Ordering::SeqCst) || self.is_running() {
            return;
        }
        self.activate().await;
    }

    /// Map host visibility onto suspend/resume
    pub async fn set_visible(&self, visible: bool) {
        if visible {
            self.resume().await;
        } else {
            self.suspend().await;
        }
    }

    /// Tear down: stop both timers for good
    ///
    /// When this returns, neither timer task is alive.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.suspend().await;
        log::info!("[quota:timer] Service shut down");
    }

    /// Run one authoritative sync now, regardless of the timers
    pub async fn sync_now(&self) -> Result<PredictedState, QuotaError> {
        log::info!("[quota:timer] Manual sync triggered");
        perform_sync(
            &self.estimator,
            self.source.as_ref(),
            &self.status,
            self.config.interval_secs,
            false,
        )
        .await
    }

    /// Caller holds the lifecycle guard
    async fn activate(&self) {
        self.estimator.lock().await.resume();
        self.status.write().await.start(self.config.interval_secs);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let decay = tokio::spawn(run_decay_loop(
            Arc::clone(&self.estimator),
            shutdown_rx.clone(),
        ));
        let sync = if self.config.enabled {
            Some(tokio::spawn(run_sync_loop(
                Arc::clone(&self.estimator),
                Arc::clone(&self.source),
                Arc::clone(&self.status),
                self.config.interval_secs,
                shutdown_rx,
            )))
        } else {
            None
        };

        let tasks = TimerTasks {
            shutdown_tx,
            decay,
            sync,
        };
        match self.tasks.lock() {
            Ok(mut slot) => {
                if let Some(previous) = slot.replace(tasks) {
                    previous.abort();
                }
            }
            Err(_) => tasks.abort(),
        }

        log::info!(
            "[quota:timer] Timers started (sync every {}s)",
            self.config.interval_secs
        );
    }
}

impl Drop for QuotaMeterService {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            if let Some(tasks) = tasks.take() {
                tasks.abort();
            }
        }
    }
}

// ============================================================================
// Timer Loops
// ============================================================================

async fn run_decay_loop(estimator: SharedEstimator, mut shutdown: watch::Receiver<bool>) {
    log::debug!("[quota:timer] Decay loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        let cadence = estimator.lock().await.tick_interval();

        tokio::select! {
            _ = tokio::time::sleep(cadence) => {}
            _ = shutdown.changed() => break,
        }

        let mut estimator = estimator.lock().await;
        if !estimator.is_active() {
            break;
        }
        estimator.tick();
    }

    log::debug!("[quota:timer] Decay loop exited");
}

async fn run_sync_loop(
    estimator: SharedEstimator,
    source: Arc<dyn UsageSource>,
    status: SharedSyncStatus,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    log::debug!("[quota:timer] Sync loop started");

    let mut timer = tokio::time::interval(Duration::from_secs(interval_secs));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = shutdown.changed() => break,
        }

        // A slow fetch must not outlive a shutdown
        tokio::select! {
            result = perform_sync(&estimator, source.as_ref(), &status, interval_secs, true) => {
                if let Err(e) = result {
                    log::debug!("[quota:timer] Sync failed, keeping last known state: {}", e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    log::debug!("[quota:timer] Sync loop exited");
}

/// Fetch once and feed the estimator
///
/// With `require_active`, results arriving after a suspend are discarded.
async fn perform_sync(
    estimator: &SharedEstimator,
    source: &dyn UsageSource,
    status: &SharedSyncStatus,
    interval_secs: u64,
    require_active: bool,
) -> Result<PredictedState, QuotaError> {
    status.write().await.begin_sync();

    let fetch = match source.fetch_usage().await {
        Ok(fetch) => fetch,
        Err(e) => {
            log::info!("[quota:timer] Failed to fetch usage: {}", e);
            status
                .write()
                .await
                .complete_sync(Some(e.to_string()), interval_secs);
            return Err(e);
        }
    };

    let state = {
        let mut estimator = estimator.lock().await;
        if require_active && !estimator.is_active() {
            log::debug!("[quota:timer] Estimator suspended, discarding fetched usage");
            estimator.current_state()
        } else {
            if let Some(headers) = fetch.rate_limit_headers {
                estimator.observe_headers_at(headers, Instant::now());
            }
            let outcome = estimator.ingest_report(&fetch.report);
            if matches!(outcome, SnapshotOutcome::Rejected | SnapshotOutcome::Reset) {
                log::debug!(
                    "[quota:timer] Source {} returned invalid usage ({:?})",
                    source.source_id(),
                    outcome
                );
            }
            estimator.current_state()
        }
    };

    status.write().await.complete_sync(None, interval_secs);
    Ok(state)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::quota::provider::UsageFetch;
    use crate::services::quota::types::{Lifecycle, UsageReport};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Source returning a fixed report and counting fetches
    struct FakeSource {
        available: bool,
        failing: AtomicBool,
        used: i64,
        limit: i64,
        fetches: AtomicUsize,
    }

    impl FakeSource {
        fn new(used: i64, limit: i64) -> Arc<Self> {
            Arc::new(Self {
                available: true,
                failing: AtomicBool::new(false),
                used,
                limit,
                fetches: AtomicUsize::new(0),
            })
        }

        fn unavailable() -> Arc<Self> {
            Arc::new(Self {
                available: false,
                failing: AtomicBool::new(false),
                used: 0,
                limit: 10_000,
                fetches: AtomicUsize::new(0),
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UsageSource for FakeSource {
        fn source_id(&self) -> &'static str {
            "fake"
        }

        async fn fetch_usage(&self) -> Result<UsageFetch, QuotaError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(QuotaError::NetworkError("Connection failed".to_string()));
            }
            Ok(UsageFetch::new(UsageReport {
                account_requests_used: Some(self.used),
                account_rate_limit: Some(self.limit),
                remaining_requests: Some(self.limit - self.used),
                ..Default::default()
            }))
        }

        async fn is_available(&self) -> bool {
            self.available
        }
    }

    fn service(source: Arc<FakeSource>, sync: SyncConfig) -> QuotaMeterService {
        QuotaMeterService::new(EstimatorConfig::default(), sync, source)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // =========================================================================
    // Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval_secs, DEFAULT_SYNC_INTERVAL_SECS);
    }

    #[test]
    fn test_config_enforces_minimum_interval() {
        assert_eq!(SyncConfig::with_interval(0).interval_secs, MIN_SYNC_INTERVAL_SECS);
        let config = SyncConfig {
            enabled: false,
            interval_secs: 0,
        };
        assert_eq!(config.validate().interval_secs, MIN_SYNC_INTERVAL_SECS);
    }

    // =========================================================================
    // Status Tests
    // =========================================================================

    #[test]
    fn test_status_start_stop() {
        let mut status = SyncStatus::default();
        status.start(10);
        assert!(status.is_running);
        assert!(status.next_sync_at.is_some());

        status.stop();
        assert!(!status.is_running);
        assert!(status.next_sync_at.is_none());
    }

    #[test]
    fn test_status_failures_reset_on_success() {
        let mut status = SyncStatus::default();
        status.start(10);
        status.begin_sync();
        assert!(status.is_syncing);

        status.complete_sync(Some("Network error".to_string()), 10);
        status.complete_sync(Some("Network error".to_string()), 10);
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.last_error.as_deref(), Some("Network error"));

        status.complete_sync(None, 10);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.syncs_completed, 1);
        assert!(status.last_error.is_none());
        assert!(!status.is_syncing);
    }

    // =========================================================================
    // Service Tests
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_start_requires_session() {
        let service = service(FakeSource::unavailable(), SyncConfig::default());
        let err = service.start().await.unwrap_err();
        assert!(matches!(err, QuotaError::Unauthorized(_)));
        assert!(!service.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_syncs_immediately() {
        let source = FakeSource::new(9000, 10_000);
        let service = service(source.clone(), SyncConfig::default());

        service.start().await.unwrap();
        settle().await;

        assert!(service.is_running());
        assert_eq!(source.fetches(), 1);
        assert_eq!(service.current_state().await.current_used, 2700);
        assert_eq!(
            service.estimator().lock().await.lifecycle(),
            Lifecycle::Active
        );

        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_cadence() {
        let source = FakeSource::new(10, 10_000);
        let service = service(source.clone(), SyncConfig::with_interval(10));

        service.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;

        // t = 0, 10, 20
        assert_eq!(source.fetches(), 3);
        assert_eq!(service.status().await.syncs_completed, 3);

        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_stops_both_timers() {
        let source = FakeSource::new(5000, 36_000);
        let service = service(source.clone(), SyncConfig::default());

        service.start().await.unwrap();
        settle().await;
        service.set_visible(false).await;

        let fetches = source.fetches();
        let state = service.current_state().await;
        assert!(!service.is_running());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(source.fetches(), fetches);
        assert_eq!(service.current_state().await, state);
        assert!(!service.status().await.is_running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_restarts_timers() {
        let source = FakeSource::new(5000, 36_000);
        let service = service(source.clone(), SyncConfig::default());

        service.start().await.unwrap();
        settle().await;
        service.suspend().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        service.set_visible(true).await;
        settle().await;
        assert!(service.is_running());
        assert_eq!(source.fetches(), 2);

        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_visibility_changes_keep_status_consistent() {
        let source = FakeSource::new(5000, 36_000);
        let service = service(source, SyncConfig::default());

        service.start().await.unwrap();
        settle().await;

        tokio::join!(service.suspend(), service.resume());
        assert!(service.is_running());
        assert_eq!(service.status().await.is_running, service.is_running());

        tokio::join!(service.resume(), service.suspend());
        assert!(!service.is_running());
        assert_eq!(service.status().await.is_running, service.is_running());

        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_final() {
        let source = FakeSource::new(5000, 36_000);
        let service = service(source.clone(), SyncConfig::default());

        service.start().await.unwrap();
        settle().await;
        service.shutdown().await;

        let fetches = source.fetches();
        service.resume().await;
        assert!(!service.is_running());
        assert!(service.start().await.is_err());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.fetches(), fetches);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sync_keeps_state_and_continues() {
        let source = FakeSource::new(5000, 36_000);
        let service = service(source.clone(), SyncConfig::default());
        service
            .estimator()
            .lock()
            .await
            .observe_rate_limit_headers(36_000, 31_000);
        source.failing.store(true, Ordering::SeqCst);

        service.start().await.unwrap();
        settle().await;

        let status = service.status().await;
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.last_error.unwrap().contains("Connection failed"));
        assert_eq!(service.current_state().await.current_used, 5000);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.fetches(), 2);

        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_decay_between_syncs() {
        let source = FakeSource::new(5000, 36_000);
        let service = service(source.clone(), SyncConfig::with_interval(3600));
        service
            .estimator()
            .lock()
            .await
            .observe_rate_limit_headers(36_000, 31_000);

        service.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        // 10 requests per second refill
        let used = service.current_state().await.current_used;
        assert!((4699..=4701).contains(&used), "used = {}", used);

        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_change_callback() {
        let source = FakeSource::new(9000, 10_000);
        let service = service(source, SyncConfig::default());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        service
            .set_on_state_change(Box::new(move |state: &PredictedState| {
                sink.lock().unwrap().push(state.current_used)
            }))
            .await;

        service.start().await.unwrap();
        settle().await;
        service.shutdown().await;

        assert_eq!(seen.lock().unwrap().first(), Some(&2700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_now_while_suspended() {
        let source = FakeSource::new(3, 10_000);
        let service = service(source.clone(), SyncConfig::default());

        let state = service.sync_now().await.unwrap();
        assert_eq!(state.current_used, 3);
        assert_eq!(source.fetches(), 1);
        assert!(!service.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_disabled_runs_decay_only() {
        let source = FakeSource::new(5000, 36_000);
        let sync = SyncConfig {
            enabled: false,
            interval_secs: 10,
        };
        let service = service(source.clone(), sync);

        service.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.fetches(), 0);
        assert!(service.is_running());

        service.shutdown().await;
    }
}
