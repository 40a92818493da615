use std::{env, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::monitoring::types::CriticalityTier;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    ReadFailed(std::io::Error),
    #[error("failed to write config file: {0}")]
    WriteFailed(std::io::Error),
    #[error("failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config path available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub probe: ProbeConfig,
    pub scheduler: SchedulerConfig,
    pub alerts: AlertConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Per-probe timeout; an unreachable host never holds the cycle
    /// longer than this.
    pub timeout_seconds: u64,
    /// Fast retries before a probe is recorded as failure.
    pub retries: u32,
    /// Bounded worker pool size for concurrent probing.
    pub pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub probe_interval_seconds: u64,
    pub alert_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Minimum criticality tier that qualifies for alerting.
    pub tier: CriticalityTier,
    /// Minimum continuous offline duration before the first alert.
    pub debounce_minutes: i64,
    /// Re-notify cadence while an outage persists.
    pub renotify_minutes: i64,
    /// Cap on re-notifications per outage.
    pub max_repeats: u32,
    /// Send a recovery notice when equipment comes back online.
    pub notify_recovery: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Webhook endpoint for alert delivery. When absent, alerts are
    /// only logged.
    pub webhook_url: Option<String>,
    pub timeout_seconds: u64,
    /// Delivery attempts per alert event before marking it failed.
    pub max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            http: HttpConfig::default(),
            probe: ProbeConfig::default(),
            scheduler: SchedulerConfig::default(),
            alerts: AlertConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "qawaq.db".into() }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 8080 }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { timeout_seconds: 2, retries: 2, pool_size: 16 }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { probe_interval_seconds: 60, alert_interval_seconds: 900 }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            tier: CriticalityTier::Critical,
            debounce_minutes: 30,
            renotify_minutes: 60,
            max_repeats: 5,
            notify_recovery: false,
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self { webhook_url: None, timeout_seconds: 10, max_attempts: 3 }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/qawaq/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("qawaq/config.toml"))
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/qawaq/config.toml
    /// or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let config: Config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::ReadFailed)?;
            toml::from_str(raw_string.as_str())?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::WriteFailed)?;
        }

        fs::write(path, config_str).map_err(Error::WriteFailed)
    }

    /// Startup validation: invalid policy values fail fast here rather
    /// than per-cycle.
    pub fn validate(&self) -> Result<(), Error> {
        if self.probe.timeout_seconds == 0 {
            return Err(Error::Invalid("probe.timeout_seconds must be non-zero".into()));
        }
        if self.probe.pool_size == 0 {
            return Err(Error::Invalid("probe.pool_size must be at least 1".into()));
        }
        if self.scheduler.probe_interval_seconds == 0 || self.scheduler.alert_interval_seconds == 0
        {
            return Err(Error::Invalid("scheduler intervals must be non-zero".into()));
        }
        if self.alerts.debounce_minutes <= 0 {
            return Err(Error::Invalid("alerts.debounce_minutes must be positive".into()));
        }
        if self.alerts.renotify_minutes < self.alerts.debounce_minutes {
            return Err(Error::Invalid(
                "alerts.renotify_minutes must not be shorter than the debounce window".into(),
            ));
        }
        if self.notifier.max_attempts == 0 {
            return Err(Error::Invalid("notifier.max_attempts must be at least 1".into()));
        }
        if let Some(raw) = &self.notifier.webhook_url {
            let url = Url::parse(raw)
                .map_err(|e| Error::Invalid(format!("notifier.webhook_url: {e}")))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(Error::Invalid(format!(
                    "notifier.webhook_url must be http(s), got {}",
                    url.scheme()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_debounce() {
        let mut cfg = Config::default();
        cfg.alerts.debounce_minutes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_renotify_shorter_than_debounce() {
        let mut cfg = Config::default();
        cfg.alerts.debounce_minutes = 30;
        cfg.alerts.renotify_minutes = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_http_webhook() {
        let mut cfg = Config::default();
        cfg.notifier.webhook_url = Some("ftp://example.com/hook".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_tier_from_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [alerts]
            tier = "medium"
            debounce_minutes = 10
            renotify_minutes = 60
            "#,
        )
        .unwrap();
        assert_eq!(cfg.alerts.tier, CriticalityTier::Medium);
        assert_eq!(cfg.alerts.debounce_minutes, 10);
    }
}
