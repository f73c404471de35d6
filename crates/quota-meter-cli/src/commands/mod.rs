//! CLI commands module
//!
//! Contains all CLI command implementations.

pub mod config;
pub mod simulate;
pub mod status;
pub mod watch;

use crate::output::OutputFormat;
use quota_meter_core::MeterConfig;

/// Shared context for all commands
pub struct Context {
    pub config: MeterConfig,
    pub format: OutputFormat,
    pub quiet: bool,
}
