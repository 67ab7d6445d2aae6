//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! `tank-config.toml` file. It covers the account, where tank data comes from,
//! how usage is computed, how often to poll, and where state is kept.
//!
//! ```toml
//! [account]
//! username = "me@example.com"
//! password = "s3cret"
//! name = "My Tank"
//!
//! [source]
//! kind = "http"
//! url = "https://bridge.example.com/tanks"
//!
//! [usage]
//! window_days = 14
//! refill_threshold = 1.1
//! timezone = "UTC"
//!
//! [polling]
//! update_interval_hours = 8
//! api_timeout_secs = 30
//! ```

use crate::consumption::DEFAULT_OIL_ENERGY_DENSITY;
use crate::source::{FileSource, HttpSource};
use crate::state::DEFAULT_STATE_PATH;
use crate::{SensitError, UsageSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_PATH: &str = "tank-config.toml";

/// Application configuration loaded from tank-config.toml
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Cloud account credentials
    pub account: AccountConfig,
    /// Where tank records come from
    pub source: SourceConfig,
    /// Usage window, refill detection and timezone policy
    pub usage: UsageSettings,
    /// Poll cadence and timeout
    pub polling: PollingConfig,
    /// Energy conversion for the consumption meter
    pub energy: EnergyConfig,
    /// Persisted state location
    pub state: StateConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
    /// Fallback display name for tanks without one
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// JSON export on disk
    File { path: String },
    /// JSON endpoint behind basic auth using the account credentials
    Http { url: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Hours between polls
    pub update_interval_hours: u64,
    /// Seconds allowed for one complete fetch
    pub api_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EnergyConfig {
    /// kWh per litre of heating oil
    pub oil_energy_density: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        AccountConfig {
            username: String::new(),
            password: String::new(),
            name: "My Tank".to_string(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::File {
            path: "tanks.json".to_string(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig {
            update_interval_hours: 8,
            api_timeout_secs: 30,
        }
    }
}

impl Default for EnergyConfig {
    fn default() -> Self {
        EnergyConfig {
            oil_energy_density: DEFAULT_OIL_ENERGY_DENSITY,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            path: DEFAULT_STATE_PATH.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            account: AccountConfig::default(),
            source: SourceConfig::default(),
            usage: UsageSettings::default(),
            polling: PollingConfig::default(),
            energy: EnergyConfig::default(),
            state: StateConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from tank-config.toml
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded configuration");
                    config
                }
                Err(e) => {
                    tracing::warn!("Invalid config file format: {e}");
                    tracing::warn!("Using default configuration");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(
                    path = %path.display(),
                    "No config file found, using default configuration"
                );
                Self::default()
            }
        }
    }

    /// Check every setting the tracker relies on.
    pub fn validate(&self) -> Result<(), SensitError> {
        self.usage.validate()?;

        if self.polling.update_interval_hours == 0 {
            return Err(SensitError::Configuration(
                "update interval must be at least one hour".to_string(),
            ));
        }
        if self.polling.api_timeout_secs == 0 {
            return Err(SensitError::Configuration(
                "API timeout must be at least one second".to_string(),
            ));
        }
        if !self.energy.oil_energy_density.is_finite() || self.energy.oil_energy_density <= 0.0 {
            return Err(SensitError::Configuration(format!(
                "oil energy density must be positive, got {}",
                self.energy.oil_energy_density
            )));
        }
        if matches!(self.source, SourceConfig::Http { .. }) && self.account.username.is_empty() {
            return Err(SensitError::Configuration("credentials not set".to_string()));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.polling.update_interval_hours * 3600)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.polling.api_timeout_secs)
    }

    pub fn file_source(&self) -> Option<FileSource> {
        match &self.source {
            SourceConfig::File { path } => Some(FileSource::new(path)),
            SourceConfig::Http { .. } => None,
        }
    }

    pub fn http_source(&self) -> Result<Option<HttpSource>, SensitError> {
        match &self.source {
            SourceConfig::Http { url } => HttpSource::new(
                url,
                &self.account.username,
                &self.account.password,
                self.api_timeout(),
            )
            .map(Some),
            SourceConfig::File { .. } => Ok(None),
        }
    }
}
