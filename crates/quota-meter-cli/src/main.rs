//! Quota meter CLI - live account quota countdown
//!
//! A command-line interface for watching an account's request quota,
//! checking the authoritative usage and simulating the local countdown.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use quota_meter_core::config::{MeterConfig, CONFIG_PATH_ENV};

#[derive(Parser)]
#[command(name = "quota-meter")]
#[command(author, version, about = "Live account quota meter", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: table (default) or json
    #[arg(long, global = true, default_value = "table")]
    format: output::OutputFormat,

    /// Suppress progress messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Override config file path (or set QUOTA_METER_CONFIG env var)
    #[arg(long = "config-file", env = "QUOTA_METER_CONFIG", global = true)]
    config_file: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the live quota countdown until Ctrl-C
    Watch {
        /// Stop after this many seconds
        #[arg(long, short)]
        duration: Option<u64>,
    },

    /// Fetch the authoritative usage once
    Status,

    /// Simulate the countdown offline from a seed snapshot
    Simulate(commands::simulate::SimulateArgs),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Set up config path if provided
    if let Some(path) = &cli.config_file {
        std::env::set_var(CONFIG_PATH_ENV, path);
    }

    let config = MeterConfig::load()?;

    // Create context for commands
    let ctx = commands::Context {
        config,
        format: cli.format,
        quiet: cli.quiet,
    };

    // Execute command
    match cli.command {
        Commands::Watch { duration } => commands::watch::execute(&ctx, duration).await,
        Commands::Status => commands::status::execute(&ctx).await,
        Commands::Simulate(args) => commands::simulate::execute(&ctx, args).await,
        Commands::Config { action } => commands::config::execute(&ctx, action).await,
    }
}
