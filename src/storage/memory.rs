//! In-memory aggregate store (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Deployments that do not need monitoring state to survive restarts
//!
//! All aggregates live behind one `RwLock`, so every trait operation is atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::backend::{AggregateStore, HealthStatus, InsertOutcome, Retention, TickUpdate};
use super::error::{StorageError, StorageResult};
use crate::{AlertEvent, MonitoringAggregate, UserId, WatchedUrl};

/// In-memory aggregate store
#[derive(Debug, Default)]
pub struct MemoryBackend {
    aggregates: RwLock<HashMap<UserId, MonitoringAggregate>>,
    retention: Retention,
}

impl MemoryBackend {
    /// Create a new in-memory backend with unbounded history
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Retention) -> Self {
        Self {
            aggregates: RwLock::default(),
            retention,
        }
    }
}

#[async_trait]
impl AggregateStore for MemoryBackend {
    async fn load_aggregate(&self, user_id: &UserId) -> StorageResult<MonitoringAggregate> {
        self.aggregates
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(user_id.to_string()))
    }

    async fn load_watch(&self, user_id: &UserId, url: &str) -> StorageResult<Option<WatchedUrl>> {
        Ok(self
            .aggregates
            .read()
            .await
            .get(user_id)
            .and_then(|aggregate| aggregate.watch(url).cloned()))
    }

    async fn list_all_watches(&self) -> StorageResult<Vec<(UserId, WatchedUrl)>> {
        let aggregates = self.aggregates.read().await;

        let mut watches: Vec<_> = aggregates
            .values()
            .flat_map(|aggregate| {
                aggregate
                    .urls
                    .iter()
                    .map(|watch| (aggregate.user_id.clone(), watch.clone()))
            })
            .collect();
        watches.sort_by(|(a, _), (b, _)| a.cmp(b));

        Ok(watches)
    }

    #[instrument(skip(self))]
    async fn insert_watch(
        &self,
        user_id: &UserId,
        url: &str,
        threshold: u32,
        max_urls: usize,
    ) -> StorageResult<InsertOutcome> {
        let mut aggregates = self.aggregates.write().await;
        let aggregate = aggregates
            .entry(user_id.clone())
            .or_insert_with(|| MonitoringAggregate::new(user_id.clone()));

        if aggregate.watch(url).is_some() {
            return Ok(InsertOutcome::Duplicate);
        }

        if aggregate.urls.len() >= max_urls {
            return Ok(InsertOutcome::QuotaExceeded);
        }

        let watch = WatchedUrl::new(url, threshold);
        aggregate.urls.push(watch.clone());
        debug!("user {user_id} now watches {} urls", aggregate.urls.len());

        Ok(InsertOutcome::Inserted(watch))
    }

    #[instrument(skip(self))]
    async fn remove_watch(&self, user_id: &UserId, url: &str) -> StorageResult<bool> {
        let mut aggregates = self.aggregates.write().await;

        let Some(aggregate) = aggregates.get_mut(user_id) else {
            return Ok(false);
        };

        let before = aggregate.urls.len();
        aggregate.urls.retain(|watch| watch.url != url);

        Ok(aggregate.urls.len() != before)
    }

    async fn append_probe_and_update_counters(&self, update: &TickUpdate) -> StorageResult<u64> {
        let mut aggregates = self.aggregates.write().await;

        let not_found = || StorageError::WatchNotFound {
            user_id: update.user_id.to_string(),
            url: update.url.clone(),
        };

        let aggregate = aggregates.get_mut(&update.user_id).ok_or_else(not_found)?;
        let watch = aggregate.watch_mut(&update.url).ok_or_else(not_found)?;

        if watch.version != update.expected_version {
            return Err(StorageError::VersionConflict {
                url: update.url.clone(),
                expected: update.expected_version,
                actual: watch.version,
            });
        }

        watch.consecutive_failures = update.counters.consecutive_failures;
        watch.success_count = update.counters.success_count;
        watch.version += 1;
        let version = watch.version;

        aggregate.history.push(update.record.clone());
        if let Some(limit) = self.retention.max_history_per_user {
            let excess = aggregate.history.len().saturating_sub(limit);
            aggregate.history.drain(..excess);
        }

        if let Some(alert) = &update.alert {
            aggregate.alerts.push(alert.clone());
        }

        Ok(version)
    }

    async fn append_alert(&self, user_id: &UserId, alert: AlertEvent) -> StorageResult<()> {
        let mut aggregates = self.aggregates.write().await;

        aggregates
            .get_mut(user_id)
            .ok_or_else(|| StorageError::NotFound(user_id.to_string()))?
            .alerts
            .push(alert);

        Ok(())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let aggregates = self.aggregates.read().await;
        let watches: usize = aggregates.values().map(|a| a.urls.len()).sum();

        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("users".to_string(), aggregates.len().to_string()),
                ("watches".to_string(), watches.to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
