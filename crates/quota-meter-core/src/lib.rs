//! # quota-meter-core
//!
//! Core logic for the quota meter - shared by the CLI and any embedding host.
//!
//! This crate provides:
//! - Quota estimation, rate-limit header ingestion and timers (`services::quota`)
//! - Configuration loading (`config` module)
//! - Unified error handling (`error` module)

pub mod config;
pub mod error;
pub mod services;

pub use config::MeterConfig;
pub use error::{Error, Result};

// Re-export commonly used types from services
pub use services::quota::{
    create_shared_estimator, AlertLevel, AlertThresholds, EstimatorConfig, HeaderOutcome,
    HttpUsageSource, Lifecycle, MeteredClient, PredictedState, QuotaError, QuotaEstimator,
    QuotaMeterService, QuotaSnapshot, RateLimitHeaders, SharedEstimator, SnapshotOutcome,
    SyncConfig, SyncStatus, UsageFetch, UsageReport, UsageSource,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version
pub fn version() -> &'static str {
    VERSION
}
