//! Meter configuration
//!
//! Load order: built-in defaults, then the JSON config file, then environment
//! overrides. The result is normalized with [`MeterConfig::validate`].
//!
//! Config file location priority: `QUOTA_METER_CONFIG` env var > platform
//! config directory (`config.json`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::services::quota::estimator::EstimatorConfig;
use crate::services::quota::timer::SyncConfig;
use crate::services::quota::types::AlertThresholds;

/// Overrides the config file location
pub const CONFIG_PATH_ENV: &str = "QUOTA_METER_CONFIG";

/// Overrides `server_url`
pub const SERVER_URL_ENV: &str = "QUOTA_METER_URL";

/// Overrides `session_cookie`
pub const SESSION_ENV: &str = "QUOTA_METER_SESSION";

/// Overrides `sync.interval_secs`
pub const SYNC_SECS_ENV: &str = "QUOTA_METER_SYNC_SECS";

/// Server used when nothing else is configured
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Effective meter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Base URL of the account service
    pub server_url: String,
    /// Raw `Cookie` header value carrying the session
    pub session_cookie: Option<String>,
    pub estimator: EstimatorConfig,
    pub sync: SyncConfig,
    pub alerts: AlertThresholds,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            session_cookie: None,
            estimator: EstimatorConfig::default(),
            sync: SyncConfig::default(),
            alerts: AlertThresholds::default(),
        }
    }
}

impl MeterConfig {
    /// Load from the default location with environment overrides applied
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        Self::load_from(&path)
    }

    /// Load from `path` with environment overrides applied
    ///
    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides()?;
        config.validate()
    }

    /// Parse the JSON file only; no env overrides, no validation
    pub fn read_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!(
                "[quota:config] No config file at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        log::info!("[quota:config] Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write the configuration as pretty JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `QUOTA_METER_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            self.server_url = url;
        }
        if let Ok(cookie) = std::env::var(SESSION_ENV) {
            self.session_cookie = if cookie.trim().is_empty() {
                None
            } else {
                Some(cookie)
            };
        }
        if let Ok(secs) = std::env::var(SYNC_SECS_ENV) {
            self.sync.interval_secs = secs.trim().parse().map_err(|_| {
                Error::config(format!("{} must be a whole number of seconds", SYNC_SECS_ENV))
            })?;
        }
        Ok(())
    }

    /// Normalize all sections; rejects a malformed server URL
    pub fn validate(&self) -> Result<Self> {
        let server_url = self.server_url.trim().trim_end_matches('/').to_string();
        if !server_url.is_empty()
            && !server_url.starts_with("http://")
            && !server_url.starts_with("https://")
        {
            return Err(Error::validation(format!(
                "server_url must start with http:// or https://, got {}",
                server_url
            )));
        }

        Ok(Self {
            server_url,
            session_cookie: self.session_cookie.clone(),
            estimator: self.estimator.validate(),
            sync: self.sync.validate(),
            alerts: self.alerts.validate(),
        })
    }
}

/// Get config file path
/// Priority: QUOTA_METER_CONFIG env var > platform config directory
pub fn config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }

    let dirs = directories::ProjectDirs::from("com", "quota-meter", "QuotaMeter")
        .ok_or_else(|| Error::config("Could not determine project directories"))?;

    Ok(dirs.config_dir().join("config.json"))
}
