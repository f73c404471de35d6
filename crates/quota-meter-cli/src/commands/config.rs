//! Config commands
//!
//! Commands for inspecting and editing the meter configuration file.

use anyhow::{anyhow, Result};
use clap::Subcommand;
use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use quota_meter_core::config::{config_path, SERVER_URL_ENV, SESSION_ENV, SYNC_SECS_ENV};
use quota_meter_core::MeterConfig;

use super::Context;
use crate::output::{print_error, print_info, print_output, print_single, print_success};

/// Keys shown by `config show`, with the env var that overrides them
const CONFIG_KEYS: &[(&str, Option<&str>)] = &[
    ("server_url", Some(SERVER_URL_ENV)),
    ("session_cookie", Some(SESSION_ENV)),
    ("sync.enabled", None),
    ("sync.interval_secs", Some(SYNC_SECS_ENV)),
    ("estimator.window_seconds", None),
    ("estimator.small_delta_threshold", None),
    ("estimator.blend_factor", None),
    ("estimator.tier_threshold", None),
    ("estimator.max_invalid_inputs", None),
    ("estimator.default_rate_limit", None),
    ("estimator.min_tick_ms", None),
    ("estimator.max_tick_ms", None),
    ("alerts.warning", None),
    ("alerts.critical", None),
];

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key (e.g. sync.interval_secs)
        key: String,
    },

    /// Set a value in the config file
    Set {
        /// Configuration key (e.g. estimator.blend_factor)
        key: String,

        /// Configuration value
        value: String,
    },

    /// Show the config file location
    Path,
}

/// Config row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Source")]
    pub source: String,
}

/// Config file location for display
#[derive(Debug, Serialize, Tabled)]
pub struct PathRow {
    #[tabled(rename = "Path")]
    pub path: String,
    #[tabled(rename = "Exists")]
    pub exists: bool,
}

pub async fn execute(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show_config(ctx),
        ConfigAction::Get { key } => get_config(ctx, key),
        ConfigAction::Set { key, value } => set_config(ctx, key, value),
        ConfigAction::Path => show_path(ctx),
    }
}

fn show_config(ctx: &Context) -> Result<()> {
    let rows = config_rows(&ctx.config, read_raw_file()?.as_ref())?;
    print_output(&rows, ctx.format)?;
    Ok(())
}

fn get_config(ctx: &Context, key: String) -> Result<()> {
    let rows = config_rows(&ctx.config, read_raw_file()?.as_ref())?;

    if let Some(row) = rows.iter().find(|r| r.key.eq_ignore_ascii_case(&key)) {
        print_info(&format!("{} = {}", row.key, row.value), ctx.quiet);
    } else {
        print_error(&format!("Config key not found: {}", key));
    }

    Ok(())
}

fn set_config(ctx: &Context, key: String, value: String) -> Result<()> {
    let key = key.to_lowercase();
    let Some((_, env)) = CONFIG_KEYS.iter().find(|(k, _)| *k == key) else {
        print_error(&format!("Unknown config key: {}", key));
        let keys: Vec<&str> = CONFIG_KEYS.iter().map(|(k, _)| *k).collect();
        print_info(&format!("Available keys: {}", keys.join(", ")), ctx.quiet);
        return Ok(());
    };

    let path = config_path()?;
    let current = MeterConfig::read_file(&path)?;
    let updated = with_value(&current, &key, &value)?;
    updated.save_to(&path)?;

    let shown = if key == "session_cookie" { mask_token(&updated.session_cookie) } else { value };
    print_success(&format!("Set {} = {}", key, shown), ctx.quiet);
    if let Some(env) = env {
        if std::env::var(env).is_ok() {
            print_info(&format!("Note: {} is set and overrides this value", env), ctx.quiet);
        }
    }
    Ok(())
}

fn show_path(ctx: &Context) -> Result<()> {
    let path = config_path()?;
    let row = PathRow {
        path: path.to_string_lossy().to_string(),
        exists: path.exists(),
    };
    print_single(&row, ctx.format)?;
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

/// The config file as raw JSON, if present
fn read_raw_file() -> Result<Option<Value>> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

fn config_rows(config: &MeterConfig, file: Option<&Value>) -> Result<Vec<ConfigRow>> {
    let effective = serde_json::to_value(config)?;

    let rows = CONFIG_KEYS
        .iter()
        .map(|(key, env)| {
            let pointer = json_pointer(key);
            let value = if *key == "session_cookie" {
                mask_token(&config.session_cookie)
            } else {
                effective
                    .pointer(&pointer)
                    .map(display_value)
                    .unwrap_or_else(|| "-".to_string())
            };
            let env_set = env.map(|e| std::env::var(e).is_ok()).unwrap_or(false);
            let in_file = file.and_then(|f| f.pointer(&pointer)).is_some();

            ConfigRow {
                key: key.to_string(),
                value,
                source: source_label(env_set, in_file).to_string(),
            }
        })
        .collect();

    Ok(rows)
}

/// Copy of `config` with one dotted key replaced, validated
fn with_value(config: &MeterConfig, key: &str, raw: &str) -> Result<MeterConfig> {
    let mut root = serde_json::to_value(config)?;
    let slot = root
        .pointer_mut(&json_pointer(key))
        .ok_or_else(|| anyhow!("Unknown config key: {}", key))?;
    *slot = parse_value(key, raw);

    let updated: MeterConfig = serde_json::from_value(root)
        .map_err(|e| anyhow!("Invalid value for {}: {}", key, e))?;
    Ok(updated.validate()?)
}

fn parse_value(key: &str, raw: &str) -> Value {
    match key {
        "session_cookie" if raw.is_empty() || raw == "-" => Value::Null,
        "server_url" | "session_cookie" => Value::String(raw.to_string()),
        _ => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

fn json_pointer(key: &str) -> String {
    format!("/{}", key.replace('.', "/"))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn source_label(env_set: bool, in_file: bool) -> &'static str {
    if env_set {
        "env"
    } else if in_file {
        "file"
    } else {
        "default"
    }
}

fn mask_token(token: &Option<String>) -> String {
    match token {
        Some(t) if !t.is_empty() => "****".to_string(),
        _ => "-".to_string(),
    }
}
