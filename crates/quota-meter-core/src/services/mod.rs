//! Services module

pub mod quota;

pub use quota::{
    create_shared_estimator, EstimatorConfig, HttpUsageSource, MeteredClient, PredictedState,
    QuotaError, QuotaEstimator, QuotaMeterService, SharedEstimator, SyncConfig, SyncStatus,
    UsageSource,
};
