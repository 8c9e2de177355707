//! Aggregate store trait definition
//!
//! This module defines the `AggregateStore` trait through which the monitoring
//! engine reads and writes per-user monitoring aggregates.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::{StorageError, StorageResult};
use crate::{AlertEvent, MonitoringAggregate, ProbeRecord, UserId, WatchCounters, WatchedUrl};

/// Outcome of a registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(WatchedUrl),

    /// The user already watches this URL; nothing was changed
    Duplicate,

    /// The user already holds the maximum number of watches
    QuotaExceeded,
}

/// Everything one tick writes, applied as a single atomic unit
///
/// The update only succeeds if the stored watch still carries `expected_version`.
#[derive(Debug, Clone)]
pub struct TickUpdate {
    pub user_id: UserId,
    pub url: String,
    pub expected_version: u64,
    pub counters: WatchCounters,
    pub record: ProbeRecord,
    pub alert: Option<AlertEvent>,
}

/// History retention policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Retention {
    /// Keep at most this many history records per user (oldest dropped first)
    pub max_history_per_user: Option<usize>,
}

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Durable keyed storage for user monitoring aggregates
///
/// Monitor tasks of the same user write concurrently. Every write is either
/// field-scoped (one watch's counters, guarded by its version) or append-only
/// (history, alerts); there is no whole-aggregate replace.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared by all monitor tasks.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Load the complete aggregate of a user
    ///
    /// Returns `StorageError::NotFound` if the user never registered a URL.
    async fn load_aggregate(&self, user_id: &UserId) -> StorageResult<MonitoringAggregate>;

    /// Load a single watch, `None` if the user does not watch `url`
    async fn load_watch(&self, user_id: &UserId, url: &str) -> StorageResult<Option<WatchedUrl>> {
        match self.load_aggregate(user_id).await {
            Ok(aggregate) => Ok(aggregate.watch(url).cloned()),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every persisted watch across all users, used for startup recovery
    async fn list_all_watches(&self) -> StorageResult<Vec<(UserId, WatchedUrl)>>;

    /// Register a new watch unless it is a duplicate or the user is at `max_urls`
    ///
    /// The uniqueness and quota checks are atomic with the insert.
    async fn insert_watch(
        &self,
        user_id: &UserId,
        url: &str,
        threshold: u32,
        max_urls: usize,
    ) -> StorageResult<InsertOutcome>;

    /// Remove a watch. Returns `false` if it did not exist.
    ///
    /// History and alerts referring to the URL are kept.
    async fn remove_watch(&self, user_id: &UserId, url: &str) -> StorageResult<bool>;

    /// Append a probe record, store new counters and optionally append an alert
    ///
    /// Returns the new watch version. Fails with `VersionConflict` if the watch was
    /// updated since it was read and with `WatchNotFound` if it was removed.
    async fn append_probe_and_update_counters(&self, update: &TickUpdate) -> StorageResult<u64>;

    /// Append an alert outside of a tick
    async fn append_alert(&self, user_id: &UserId, alert: AlertEvent) -> StorageResult<()>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
