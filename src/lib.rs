pub mod actors;
pub mod alerts;
pub mod config;
pub mod discord;
pub mod error;
pub mod monitors;
pub mod probe;
pub mod service;
pub mod storage;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::ProbeOutcome;

/// Maximum number of watched URLs a single user may hold
pub const DEFAULT_MAX_URLS_PER_USER: usize = 20;

/// Highest threshold accepted at registration unless configured otherwise
pub const DEFAULT_MAX_THRESHOLD: u32 = 2;

/// Verified user identifier handed over by the account service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One monitored endpoint belonging to one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedUrl {
    pub url: String,

    /// Consecutive failures required to raise one alert
    pub threshold: u32,

    #[serde(rename = "failed")]
    pub consecutive_failures: u32,

    #[serde(rename = "succeeded")]
    pub success_count: u64,

    /// Optimistic concurrency token, bumped by every counter update
    #[serde(default)]
    pub version: u64,
}

impl WatchedUrl {
    pub fn new(url: impl Into<String>, threshold: u32) -> Self {
        Self {
            url: url.into(),
            threshold,
            consecutive_failures: 0,
            success_count: 0,
            version: 0,
        }
    }

    pub fn counters(&self) -> WatchCounters {
        WatchCounters {
            consecutive_failures: self.consecutive_failures,
            success_count: self.success_count,
        }
    }

    pub fn snapshot(&self) -> UrlSnapshot {
        UrlSnapshot {
            url: self.url.clone(),
            threshold: self.threshold,
            failed: self.consecutive_failures,
            succeeded: self.success_count,
        }
    }
}

/// The part of a [`WatchedUrl`] a monitor task is allowed to write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchCounters {
    pub consecutive_failures: u32,
    pub success_count: u64,
}

/// Value copy of a watch as it looked when a probe was issued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlSnapshot {
    pub url: String,
    pub threshold: u32,
    pub failed: u32,
    pub succeeded: u64,
}

/// History entry written once per completed tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub url: UrlSnapshot,

    /// `None` when no HTTP response was obtained
    pub status_code: Option<u16>,

    pub requested_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeRecord {
    pub fn new(url: UrlSnapshot, outcome: &ProbeOutcome, requested_at: DateTime<Utc>) -> Self {
        let error = match outcome {
            ProbeOutcome::TransportError(cause) => Some(cause.clone()),
            _ => None,
        };

        Self {
            url,
            status_code: outcome.status_code(),
            requested_at,
            error,
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status_code.is_none()
    }
}

/// Raised when consecutive failures reach a watch's threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub url: UrlSnapshot,
    pub status_code: Option<u16>,
    pub requested_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ProbeRecord> for AlertEvent {
    fn from(record: ProbeRecord) -> Self {
        Self {
            url: record.url,
            status_code: record.status_code,
            requested_at: record.requested_at,
            error: record.error,
        }
    }
}

/// Complete persisted monitoring state of one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringAggregate {
    pub user_id: UserId,

    /// Registration order
    pub urls: Vec<WatchedUrl>,

    pub history: Vec<ProbeRecord>,

    pub alerts: Vec<AlertEvent>,
}

impl MonitoringAggregate {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            urls: Vec::new(),
            history: Vec::new(),
            alerts: Vec::new(),
        }
    }

    pub fn watch(&self, url: &str) -> Option<&WatchedUrl> {
        self.urls.iter().find(|watch| watch.url == url)
    }

    pub fn watch_mut(&mut self, url: &str) -> Option<&mut WatchedUrl> {
        self.urls.iter_mut().find(|watch| watch.url == url)
    }
}
