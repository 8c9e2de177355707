use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::trace;

use crate::{DEFAULT_MAX_THRESHOLD, DEFAULT_MAX_URLS_PER_USER, storage::Retention};

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorSettings,

    /// Storage configuration (defaults to SQLite)
    pub storage: Option<StorageConfig>,

    /// Where alerts are delivered in addition to the alert log
    pub alert: Option<Alert>,

    /// Watches registered on startup (duplicates are skipped)
    #[serde(default)]
    pub watches: Vec<WatchConfig>,
}

/// Timing and policy knobs shared by all monitor tasks
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Seconds between two ticks of one monitor task
    pub interval_secs: u64,

    /// Per-probe HTTP timeout, must be shorter than the interval
    pub probe_timeout_secs: u64,

    pub max_urls_per_user: usize,

    /// Highest accepted threshold (lowest is always 1)
    pub max_threshold: u32,

    /// Reload-and-retry attempts after a version conflict
    pub persist_retries: u32,

    /// Upper bound of the backoff while the store is unavailable
    pub max_backoff_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            probe_timeout_secs: 5,
            max_urls_per_user: DEFAULT_MAX_URLS_PER_USER,
            max_threshold: DEFAULT_MAX_THRESHOLD,
            persist_retries: 3,
            max_backoff_secs: 300,
        }
    }
}

impl MonitorSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_secs == 0 {
            bail!("monitor.interval_secs must be greater than 0");
        }
        if self.probe_timeout_secs == 0 || self.probe_timeout_secs >= self.interval_secs {
            bail!(
                "monitor.probe_timeout_secs must be between 1 and {} (the tick interval)",
                self.interval_secs - 1
            );
        }
        if self.max_urls_per_user == 0 {
            bail!("monitor.max_urls_per_user must be greater than 0");
        }
        if self.max_threshold == 0 {
            bail!("monitor.max_threshold must be greater than 0");
        }
        Ok(())
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None {
        #[serde(default)]
        max_history_per_user: Option<usize>,
    },

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Oldest history records beyond this count are dropped
        #[serde(default)]
        max_history_per_user: Option<usize>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            max_history_per_user: None,
        }
    }
}

impl StorageConfig {
    pub fn retention(&self) -> Retention {
        let max_history_per_user = match self {
            StorageConfig::None {
                max_history_per_user,
            } => *max_history_per_user,
            StorageConfig::Sqlite {
                max_history_per_user,
                ..
            } => *max_history_per_user,
        };

        Retention {
            max_history_per_user,
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./httpmon.db")
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alert {
    Discord(Discord),
    Webhook(Webhook),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct WatchConfig {
    pub user_id: String,
    pub url: String,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

fn default_threshold() -> u32 {
    1
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("could not read {path}"))?;
    let config: Config = serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {path}"))?;
    config.monitor.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
