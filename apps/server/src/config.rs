//! Application configuration.

use chrono::TimeDelta;
use meterbot_alerts::{AlertPolicy, OneBotConfig};
use meterbot_billing::BillingConfig;
use meterbot_core::UserId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Application configuration.
///
/// Every field has a default, so a config file only needs the settings it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding one JSON document per group.
    pub data_dir: PathBuf,
    /// Feature switch file.
    pub switch_file: PathBuf,
    pub billing: BillingSettings,
    pub alerts: AlertSettings,
    pub onebot: OneBotSettings,
    /// Users allowed to toggle the feature in any group.
    pub owners: Vec<String>,
    /// Logging level.
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/groups"),
            switch_file: PathBuf::from("data/switch.json"),
            billing: BillingSettings::default(),
            alerts: AlertSettings::default(),
            onebot: OneBotSettings::default(),
            owners: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn owner_ids(&self) -> Vec<UserId> {
        self.owners
            .iter()
            .map(UserId::new)
            .filter(|id| !id.is_empty())
            .collect()
    }
}

/// Billing lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingSettings {
    pub endpoint: String,
    /// Per-lookup timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for BillingSettings {
    fn default() -> Self {
        let defaults = BillingConfig::default();
        Self {
            endpoint: defaults.endpoint,
            timeout_secs: defaults.timeout.as_secs(),
        }
    }
}

impl From<&BillingSettings> for BillingConfig {
    fn from(settings: &BillingSettings) -> Self {
        BillingConfig {
            endpoint: settings.endpoint.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

/// Sweep and alert settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Alert when a balance is strictly below this.
    pub threshold: Decimal,
    /// Minimum seconds between two alerts for one member of one group.
    pub interval_secs: u64,
    /// Pause after each alert, in milliseconds.
    pub send_pause_ms: u64,
    /// Seconds between the start of one sweep and the next.
    pub sweep_interval_secs: u64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        let policy = AlertPolicy::default();
        Self {
            threshold: policy.threshold,
            interval_secs: policy.interval.num_seconds().unsigned_abs(),
            send_pause_ms: policy.send_pause.as_millis() as u64,
            sweep_interval_secs: 3600,
        }
    }
}

impl AlertSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl From<&AlertSettings> for AlertPolicy {
    fn from(settings: &AlertSettings) -> Self {
        let interval = i64::try_from(settings.interval_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        AlertPolicy::default()
            .with_threshold(settings.threshold)
            .with_interval(interval)
            .with_send_pause(Duration::from_millis(settings.send_pause_ms))
    }
}

/// OneBot connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OneBotSettings {
    /// HTTP API base URL for outbound messages.
    pub api_url: String,
    pub access_token: Option<String>,
    /// Address the event receiver listens on.
    pub listen_addr: String,
}

impl Default for OneBotSettings {
    fn default() -> Self {
        Self {
            api_url: OneBotConfig::default().api_url,
            access_token: None,
            listen_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl From<&OneBotSettings> for OneBotConfig {
    fn from(settings: &OneBotSettings) -> Self {
        OneBotConfig {
            api_url: settings.api_url.clone(),
            access_token: settings.access_token.clone().filter(|t| !t.is_empty()),
            ..Default::default()
        }
    }
}
