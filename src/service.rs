//! Entry points for an outer API layer
//!
//! Every call acts on behalf of an already authenticated [`UserId`]. Writes go
//! through the supervisor so tasks start and stop with their watches; reads go
//! straight to the store.

use std::sync::Arc;

use tracing::instrument;

use crate::{
    AlertEvent, MonitoringAggregate, ProbeRecord, UserId, WatchedUrl,
    actors::supervisor::SupervisorHandle,
    error::MonitorResult,
    storage::{AggregateStore, StorageError},
};

#[derive(Clone)]
pub struct WatchService {
    supervisor: SupervisorHandle,
    store: Arc<dyn AggregateStore>,
}

impl WatchService {
    pub fn new(supervisor: SupervisorHandle, store: Arc<dyn AggregateStore>) -> Self {
        Self { supervisor, store }
    }

    pub async fn register_url(
        &self,
        user_id: UserId,
        url: impl Into<String>,
        threshold: u32,
    ) -> MonitorResult<WatchedUrl> {
        self.supervisor.register(user_id, url, threshold).await
    }

    pub async fn remove_url(&self, user_id: UserId, url: impl Into<String>) -> MonitorResult<()> {
        self.supervisor.remove(user_id, url).await
    }

    /// Watches in registration order
    pub async fn list_urls(&self, user_id: &UserId) -> MonitorResult<Vec<WatchedUrl>> {
        Ok(self.aggregate(user_id).await?.urls)
    }

    /// Oldest first
    pub async fn list_history(&self, user_id: &UserId) -> MonitorResult<Vec<ProbeRecord>> {
        Ok(self.aggregate(user_id).await?.history)
    }

    pub async fn list_alerts(&self, user_id: &UserId) -> MonitorResult<Vec<AlertEvent>> {
        Ok(self.aggregate(user_id).await?.alerts)
    }

    /// A user the store has never seen has an empty aggregate
    #[instrument(skip(self))]
    async fn aggregate(&self, user_id: &UserId) -> MonitorResult<MonitoringAggregate> {
        match self.store.load_aggregate(user_id).await {
            Ok(aggregate) => Ok(aggregate),
            Err(StorageError::NotFound(_)) => Ok(MonitoringAggregate::new(user_id.clone())),
            Err(e) => Err(e.into()),
        }
    }
}
