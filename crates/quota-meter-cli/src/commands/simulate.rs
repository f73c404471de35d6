//! Simulate command
//!
//! Offline countdown: seed an estimator with a snapshot, then sample the
//! decayed state on a simulated clock.

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use tokio::time::{Duration, Instant};

use quota_meter_core::{AlertThresholds, QuotaEstimator, SnapshotOutcome};

use super::Context;
use crate::output::{level_label, print_output};

/// Upper bound on seeding snapshots before giving up
const MAX_SEED_ROUNDS: usize = 200;

/// Longest simulated run (one week)
const MAX_SIMULATED_SECS: u64 = 7 * 24 * 3600;

/// Most samples a single run may produce
const MAX_SAMPLES: u64 = 10_000;

#[derive(Args)]
pub struct SimulateArgs {
    /// Requests used in the seed snapshot
    #[arg(long)]
    pub used: i64,

    /// Quota ceiling in the seed snapshot
    #[arg(long)]
    pub limit: i64,

    /// Seconds to simulate
    #[arg(long, default_value_t = 60)]
    pub seconds: u64,

    /// Seconds between samples
    #[arg(long, default_value_t = 10)]
    pub step: u64,
}

/// One sample of the simulated countdown
#[derive(Debug, Serialize, Tabled)]
pub struct SampleRow {
    #[tabled(rename = "Elapsed")]
    pub elapsed_secs: u64,
    #[tabled(rename = "Used")]
    pub used: u64,
    #[tabled(rename = "Remaining")]
    pub remaining: u64,
    #[tabled(rename = "Usage %")]
    pub percentage: String,
    #[tabled(rename = "Level")]
    pub level: String,
}

pub async fn execute(ctx: &Context, args: SimulateArgs) -> Result<()> {
    let rows = simulate(ctx, &args)?;
    print_output(&rows, ctx.format)?;
    Ok(())
}

fn simulate(ctx: &Context, args: &SimulateArgs) -> Result<Vec<SampleRow>> {
    if args.step == 0 {
        bail!("--step must be at least 1 second");
    }
    if args.seconds > MAX_SIMULATED_SECS {
        bail!("--seconds must be at most {} (one week)", MAX_SIMULATED_SECS);
    }
    let samples = args.seconds.div_ceil(args.step) + 1;
    if samples > MAX_SAMPLES {
        bail!(
            "--seconds {} with --step {} would produce {} samples (max {}); use a larger step",
            args.seconds,
            args.step,
            samples,
            MAX_SAMPLES
        );
    }

    let start = Instant::now();
    let mut estimator = QuotaEstimator::new(ctx.config.estimator.clone());
    estimator.resume_at(start);

    // Converge onto the seed so the countdown starts from the reported usage
    let mut seeded = false;
    for _ in 0..MAX_SEED_ROUNDS {
        match estimator.ingest_authoritative_snapshot_at(args.used, args.limit, None, start) {
            SnapshotOutcome::Snapped => {
                seeded = true;
                break;
            }
            SnapshotOutcome::Blended => continue,
            SnapshotOutcome::Rejected | SnapshotOutcome::Reset => {
                bail!("Invalid seed snapshot: used={} limit={}", args.used, args.limit)
            }
        }
    }
    if !seeded {
        bail!("Seed snapshot did not converge; check estimator.blend_factor");
    }

    sample(&mut estimator, start, args, &ctx.config.alerts)
}

fn sample(
    estimator: &mut QuotaEstimator,
    start: Instant,
    args: &SimulateArgs,
    alerts: &AlertThresholds,
) -> Result<Vec<SampleRow>> {
    let mut rows = Vec::new();
    let mut elapsed: u64 = 0;

    loop {
        let Some(now) = start.checked_add(Duration::from_secs(elapsed)) else {
            bail!("Simulated clock overflowed at {}s", elapsed);
        };
        estimator.tick_at(now);
        let state = estimator.current_state();
        rows.push(SampleRow {
            elapsed_secs: elapsed,
            used: state.current_used,
            remaining: state.current_remaining,
            percentage: format!("{:.1}", state.percentage()),
            level: level_label(state.alert_level(alerts.warning, alerts.critical)).to_string(),
        });

        if elapsed >= args.seconds {
            break;
        }
        elapsed = elapsed.saturating_add(args.step).min(args.seconds);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use quota_meter_core::MeterConfig;

    fn ctx() -> Context {
        Context {
            config: MeterConfig::default(),
            format: OutputFormat::Table,
            quiet: true,
        }
    }

    fn args(used: i64, limit: i64, seconds: u64, step: u64) -> SimulateArgs {
        SimulateArgs {
            used,
            limit,
            seconds,
            step,
        }
    }

    #[test]
    fn test_simulate_starts_from_seed() {
        let rows = simulate(&ctx(), &args(9000, 10_000, 0, 10)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].used, 9000);
        assert_eq!(rows[0].remaining, 1000);
        assert_eq!(rows[0].level, "warning");
    }

    #[test]
    fn test_simulate_decays_at_refill_rate() {
        // 36000 per hour refills 10 per second
        let rows = simulate(&ctx(), &args(5000, 36_000, 30, 10)).unwrap();
        let used: Vec<u64> = rows.iter().map(|r| r.used).collect();
        assert_eq!(used, vec![5000, 4900, 4800, 4700]);
        assert_eq!(rows[3].elapsed_secs, 30);
    }

    #[test]
    fn test_simulate_last_sample_at_end() {
        let rows = simulate(&ctx(), &args(100, 10_000, 25, 10)).unwrap();
        let elapsed: Vec<u64> = rows.iter().map(|r| r.elapsed_secs).collect();
        assert_eq!(elapsed, vec![0, 10, 20, 25]);
    }

    #[test]
    fn test_simulate_floors_at_zero() {
        let rows = simulate(&ctx(), &args(10, 36_000, 60, 30)).unwrap();
        assert_eq!(rows.last().map(|r| r.used), Some(0));
    }

    #[test]
    fn test_simulate_rejects_invalid_seed() {
        assert!(simulate(&ctx(), &args(11, 10, 10, 1)).is_err());
        assert!(simulate(&ctx(), &args(1, 10, 10, 0)).is_err());
    }

    #[test]
    fn test_simulate_rejects_oversized_runs() {
        let err = simulate(&ctx(), &args(100, 10_000, u64::MAX, u64::MAX)).unwrap_err();
        assert!(err.to_string().contains("--seconds"));

        let err = simulate(&ctx(), &args(100, 10_000, MAX_SIMULATED_SECS, 1)).unwrap_err();
        assert!(err.to_string().contains("samples"));
    }

    #[test]
    fn test_simulate_longest_run_within_bounds() {
        let rows = simulate(&ctx(), &args(100, 10_000, MAX_SIMULATED_SECS, 3600)).unwrap();
        assert_eq!(rows.len(), 169);
        assert_eq!(rows.last().map(|r| r.elapsed_secs), Some(MAX_SIMULATED_SECS));
        assert_eq!(rows.last().map(|r| r.used), Some(0));
    }
}
