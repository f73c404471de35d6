//! Watch command
//!
//! Runs the quota meter against the configured server and prints every
//! visible change of the predicted usage.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Serialize;
use tabled::Tabled;

use quota_meter_core::{HttpUsageSource, PredictedState, QuotaMeterService};

use super::Context;
use crate::output::{level_label, print_info, print_single, print_usage_line, usage_text};

/// Summary printed after the watch ends
#[derive(Debug, Serialize, Tabled)]
pub struct WatchSummary {
    #[tabled(rename = "Final Usage")]
    pub usage: String,
    #[tabled(rename = "Level")]
    pub level: String,
    #[tabled(rename = "Syncs")]
    pub syncs_completed: u64,
    #[tabled(rename = "Failures")]
    pub consecutive_failures: u32,
    #[tabled(rename = "Last Error")]
    pub last_error: String,
}

pub async fn execute(ctx: &Context, duration: Option<u64>) -> Result<()> {
    let source = HttpUsageSource::from_config(&ctx.config)?;
    let service = QuotaMeterService::new(
        ctx.config.estimator.clone(),
        ctx.config.sync.clone(),
        Arc::new(source),
    );

    let thresholds = ctx.config.alerts.clone();
    let format = ctx.format;
    service
        .set_on_state_change(Box::new(move |state: &PredictedState| {
            print_usage_line(state, &thresholds, format)
        }))
        .await;

    service.start().await.with_context(|| {
        format!(
            "Cannot start watching {} (set QUOTA_METER_SESSION to a valid session cookie)",
            ctx.config.server_url
        )
    })?;
    print_info("Watching quota (Ctrl-C to stop)...", ctx.quiet);

    match duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    service.shutdown().await;

    let state = service.current_state().await;
    let status = service.status().await;
    let alerts = &ctx.config.alerts;
    let summary = WatchSummary {
        usage: usage_text(&state),
        level: level_label(state.alert_level(alerts.warning, alerts.critical)).to_string(),
        syncs_completed: status.syncs_completed,
        consecutive_failures: status.consecutive_failures,
        last_error: status.last_error.unwrap_or_else(|| "-".to_string()),
    };

    if !ctx.quiet {
        print_single(&summary, ctx.format)?;
    }
    Ok(())
}
