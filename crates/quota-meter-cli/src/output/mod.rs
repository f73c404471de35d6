//! Output formatting module
//!
//! Provides table and JSON output formatting for CLI commands.

use colored::Colorize;
use quota_meter_core::{AlertLevel, AlertThresholds, PredictedState};
use serde::Serialize;
use std::fmt::Display;
use tabled::{Table, Tabled};

/// Output format enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {}. Use 'table' or 'json'", s)),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Print data in the specified format
pub fn print_output<T>(data: &[T], format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
{
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("No items found.");
            } else {
                let table = Table::new(data).to_string();
                println!("{}", table);
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(data)?;
            println!("{}", json);
        }
    }
    Ok(())
}

/// Print a single item in the specified format
pub fn print_single<T>(data: &T, format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
{
    match format {
        OutputFormat::Table => {
            let table = Table::new([data]).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(data)?;
            println!("{}", json);
        }
    }
    Ok(())
}

/// Print a success message (respects quiet mode)
pub fn print_success(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message.green());
    }
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{}", message.red());
}

/// Print an info message (respects quiet mode)
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message);
    }
}

// =============================================================================
// Quota rendering
// =============================================================================

/// `used / limit (pct%)`
pub fn usage_text(state: &PredictedState) -> String {
    format!(
        "{} / {} ({:.1}%)",
        state.current_used,
        state.rate_limit,
        state.percentage()
    )
}

/// Lowercase label for an alert level
pub fn level_label(level: AlertLevel) -> &'static str {
    match level {
        AlertLevel::Normal => "normal",
        AlertLevel::Warning => "warning",
        AlertLevel::Critical => "critical",
    }
}

/// Colour text by alert level
pub fn colorize_level(text: &str, level: AlertLevel) -> String {
    match level {
        AlertLevel::Normal => text.green().to_string(),
        AlertLevel::Warning => text.yellow().to_string(),
        AlertLevel::Critical => text.red().bold().to_string(),
    }
}

/// One streamed quota line for JSON output
#[derive(Debug, Serialize)]
struct UsageLine {
    used: u64,
    remaining: u64,
    limit: u64,
    percentage: f64,
    level: AlertLevel,
}

/// Print one state change: a coloured line, or one compact JSON object
pub fn print_usage_line(state: &PredictedState, thresholds: &AlertThresholds, format: OutputFormat) {
    let level = state.alert_level(thresholds.warning, thresholds.critical);
    match format {
        OutputFormat::Table => println!("{}", colorize_level(&usage_text(state), level)),
        OutputFormat::Json => {
            let line = UsageLine {
                used: state.current_used,
                remaining: state.current_remaining,
                limit: state.rate_limit,
                percentage: state.percentage(),
                level,
            };
            match serde_json::to_string(&line) {
                Ok(json) => println!("{}", json),
                Err(e) => log::warn!("Failed to serialize usage line: {}", e),
            }
        }
    }
}
