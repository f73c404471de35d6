//! Status command
//!
//! One authoritative read of the account usage, without the estimator.

use anyhow::{anyhow, Result};
use serde::Serialize;
use tabled::Tabled;

use quota_meter_core::{HttpUsageSource, PredictedState, UsageFetch, UsageReport, UsageSource};

use super::Context;
use crate::output::{level_label, print_info, print_output, print_single, usage_text, OutputFormat};

/// Account usage row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct UsageRow {
    #[tabled(rename = "Account")]
    pub account: String,
    #[tabled(rename = "Usage")]
    pub usage: String,
    #[tabled(rename = "Remaining")]
    pub remaining: u64,
    #[tabled(rename = "Level")]
    pub level: String,
    #[tabled(rename = "Resets At")]
    pub resets_at: String,
    #[tabled(rename = "Header Limit")]
    pub header_limit: String,
}

/// Per-key row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct KeyRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Requests")]
    pub requests: i64,
    #[tabled(rename = "Share")]
    pub share: String,
    #[tabled(rename = "Last Used")]
    pub last_used: String,
}

/// Full status for JSON output
#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub usage: UsageRow,
    pub keys: Vec<KeyRow>,
}

pub async fn execute(ctx: &Context) -> Result<()> {
    let source = HttpUsageSource::from_config(&ctx.config)?;
    let fetch = source.fetch_usage().await?;
    let output = build_status(&fetch, ctx)?;

    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Table => {
            print_single(&output.usage, ctx.format)?;
            if !output.keys.is_empty() {
                print_info("", ctx.quiet);
                print_output(&output.keys, ctx.format)?;
            }
        }
    }
    Ok(())
}

fn build_status(fetch: &UsageFetch, ctx: &Context) -> Result<StatusOutput> {
    let report = &fetch.report;
    let state = report_state(report)?;
    let alerts = &ctx.config.alerts;

    let usage = UsageRow {
        account: report
            .account_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
        usage: usage_text(&state),
        remaining: state.current_remaining,
        level: level_label(state.alert_level(alerts.warning, alerts.critical)).to_string(),
        resets_at: report
            .rate_limit_reset_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
        header_limit: fetch
            .rate_limit_headers
            .map(|h| format!("{} ({} left)", h.limit, h.remaining))
            .unwrap_or_else(|| "-".to_string()),
    };

    let keys = report
        .key_usage_breakdown
        .iter()
        .map(|key| KeyRow {
            key: key.key_prefix.clone().unwrap_or_else(|| "-".to_string()),
            name: key.key_name.clone().unwrap_or_else(|| "-".to_string()),
            requests: key.request_count.unwrap_or(0),
            share: key
                .percentage_of_total
                .map(|p| format!("{:.1}%", p))
                .unwrap_or_else(|| "-".to_string()),
            last_used: key
                .last_used
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string()),
        })
        .collect();

    Ok(StatusOutput { usage, keys })
}

/// Authoritative state straight from the report
fn report_state(report: &UsageReport) -> Result<PredictedState> {
    let used = report
        .account_requests_used
        .ok_or_else(|| anyhow!("Server response is missing accountRequestsUsed"))?;
    let limit = report
        .account_rate_limit
        .ok_or_else(|| anyhow!("Server response is missing accountRateLimit"))?;
    if used < 0 || limit <= 0 || used > limit {
        return Err(anyhow!("Server reported invalid usage {}/{}", used, limit));
    }
    Ok(PredictedState::from_used(used as f64, limit as u64))
}
