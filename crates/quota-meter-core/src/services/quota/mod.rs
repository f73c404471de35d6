//! Quota estimation module
//!
//! Keeps a live, locally predicted view of the account's request quota
//! between authoritative server reads, so the displayed usage counts down
//! smoothly instead of jumping every poll.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ QuotaMeterService (timer layer)                         │
//! │   - start() / suspend() / resume() / shutdown()         │
//! │   - decay loop: tick() at the refill cadence            │
//! │   - sync loop: fetch_usage() every interval             │
//! └─────────────────────────────────────────────────────────┘
//!          │                                   │
//!          ▼                                   ▼
//! ┌─────────────────────────┐     ┌─────────────────────────┐
//! │ QuotaEstimator          │     │ trait UsageSource       │
//! │   - ingest_report()     │◄────│   - fetch_usage()       │
//! │   - observe_headers()   │     │   - is_available()      │
//! │   - tick()              │     └─────────────────────────┘
//! │   - on_state_change     │                  │
//! └─────────────────────────┘                  ▼
//!          ▲                          ┌─────────────────┐
//!          │  X-RateLimit-*           │ HttpUsageSource │
//! ┌─────────────────┐                 └─────────────────┘
//! │ MeteredClient   │
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use quota_meter_core::config::MeterConfig;
//! use quota_meter_core::services::quota::{HttpUsageSource, QuotaMeterService};
//!
//! let config = MeterConfig::load()?;
//! let source = Arc::new(HttpUsageSource::from_config(&config)?);
//! let service = QuotaMeterService::new(config.estimator, config.sync, source);
//!
//! service
//!     .set_on_state_change(Box::new(|state| println!("{}/{}", state.current_used, state.rate_limit)))
//!     .await;
//! service.start().await?;
//! // ... host hidden / visible
//! service.set_visible(false).await;
//! service.set_visible(true).await;
//! service.shutdown().await;
//! ```

pub mod estimator;
pub mod headers;
pub mod http;
pub mod provider;
pub mod timer;
pub mod types;

// Re-export main types
pub use types::{
    AlertLevel,
    AlertThresholds,
    HeaderOutcome,
    KeyUsage,
    Lifecycle,
    PredictedState,
    QuotaSnapshot,
    SnapshotOutcome,
    SnapshotSource,
    UsageReport,
};

// Re-export the estimator
pub use estimator::{
    create_shared_estimator,
    EstimatorConfig,
    QuotaEstimator,
    SharedEstimator,
    StateChangeCallback,
};

pub use headers::{RateLimitHeaders, LIMIT_HEADER, REMAINING_HEADER};

// Re-export source trait and error
pub use provider::{QuotaError, UsageFetch, UsageSource};

// Re-export HTTP collaborators
pub use http::{HttpUsageSource, MeteredClient};

// Re-export timer types
pub use timer::{
    QuotaMeterService,
    SharedSyncStatus,
    SyncConfig,
    SyncStatus,
    DEFAULT_SYNC_INTERVAL_SECS,
    MIN_SYNC_INTERVAL_SECS,
};
