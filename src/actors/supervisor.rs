//! SupervisorActor - Owns the set of running monitor tasks
//!
//! Registration and removal go through this actor, one command at a time, so the
//! store and the set of running tasks never disagree for longer than one command.
//!
//! ## Message Flow
//!
//! ```text
//! Register → validate → store.insert_watch → spawn MonitorActor
//! Remove   → store.remove_watch → stop MonitorActor (awaited)
//! Recover / ResumeUser → store.list_* → spawn MonitorActor for every watch not running
//! Shutdown → stop all MonitorActors (awaited) → exit
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::{
    UserId, WatchedUrl,
    config::MonitorSettings,
    error::{MonitorError, MonitorResult, ValidationError},
    probe::Prober,
    storage::{AggregateStore, InsertOutcome, StorageError},
};

use super::messages::{MonitorEvent, StopReason, SupervisorCommand, TaskState};
use super::monitor::{MonitorHandle, MonitorTask};

type TaskKey = (UserId, String);

/// Check registration input before anything touches the store
pub fn validate_registration(
    url: &str,
    threshold: u32,
    settings: &MonitorSettings,
) -> Result<(), ValidationError> {
    if threshold == 0 || threshold > settings.max_threshold {
        return Err(ValidationError::InvalidThreshold {
            threshold,
            max: settings.max_threshold,
        });
    }

    let parsed = reqwest::Url::parse(url).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ValidationError::InvalidUrl(format!(
            "unsupported scheme {scheme}"
        ))),
    }
}

pub struct SupervisorActor {
    store: Arc<dyn AggregateStore>,
    prober: Arc<dyn Prober>,
    settings: MonitorSettings,

    /// Handed to every spawned monitor actor
    event_tx: broadcast::Sender<MonitorEvent>,

    command_rx: mpsc::Receiver<SupervisorCommand>,

    /// Finished handles are pruned lazily
    tasks: HashMap<TaskKey, MonitorHandle>,
}

impl SupervisorActor {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        prober: Arc<dyn Prober>,
        settings: MonitorSettings,
        command_rx: mpsc::Receiver<SupervisorCommand>,
        event_tx: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        Self {
            store,
            prober,
            settings,
            event_tx,
            command_rx,
            tasks: HashMap::new(),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting supervisor actor");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                SupervisorCommand::Register {
                    user_id,
                    url,
                    threshold,
                    respond_to,
                } => {
                    let result = self.register(user_id, url, threshold).await;
                    let _ = respond_to.send(result);
                }

                SupervisorCommand::Remove {
                    user_id,
                    url,
                    respond_to,
                } => {
                    let result = self.remove(user_id, url).await;
                    let _ = respond_to.send(result);
                }

                SupervisorCommand::Recover { respond_to } => {
                    let _ = respond_to.send(self.recover().await);
                }

                SupervisorCommand::ResumeUser {
                    user_id,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.resume_user(&user_id).await);
                }

                SupervisorCommand::Running { respond_to } => {
                    self.prune_finished();
                    let mut running: Vec<_> = self.tasks.keys().cloned().collect();
                    running.sort();
                    let _ = respond_to.send(running);
                }

                SupervisorCommand::Shutdown { respond_to } => {
                    debug!("received shutdown command");
                    self.stop_all().await;
                    let _ = respond_to.send(());
                    debug!("supervisor actor stopped");
                    return;
                }
            }
        }

        warn!("command channel closed, shutting down");
        self.stop_all().await;
    }

    #[instrument(skip(self), fields(user = %user_id))]
    async fn register(
        &mut self,
        user_id: UserId,
        url: String,
        threshold: u32,
    ) -> MonitorResult<WatchedUrl> {
        validate_registration(&url, threshold, &self.settings)?;

        if self.is_running(&(user_id.clone(), url.clone())) {
            return Err(ValidationError::DuplicateUrl(url).into());
        }

        let watch = match self
            .store
            .insert_watch(&user_id, &url, threshold, self.settings.max_urls_per_user)
            .await?
        {
            InsertOutcome::Inserted(watch) => watch,
            InsertOutcome::Duplicate => return Err(ValidationError::DuplicateUrl(url).into()),
            InsertOutcome::QuotaExceeded => {
                return Err(ValidationError::QuotaExceeded {
                    max: self.settings.max_urls_per_user,
                }
                .into());
            }
        };

        info!("registered {url} (threshold {threshold})");
        self.spawn_task(user_id, url);

        Ok(watch)
    }

    /// Remove from the store first, then stop the task
    ///
    /// A task that ticks between the two steps finds its URL gone and stops by itself.
    #[instrument(skip(self), fields(user = %user_id))]
    async fn remove(&mut self, user_id: UserId, url: String) -> MonitorResult<()> {
        if !self.store.remove_watch(&user_id, &url).await? {
            return Err(MonitorError::UrlNotFound(url));
        }

        if let Some(handle) = self.tasks.remove(&(user_id, url.clone())) {
            let reason = handle.stop(StopReason::Cancelled).await;
            debug!("monitor task stopped ({reason:?})");
        }

        info!("removed {url}");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn recover(&mut self) -> MonitorResult<usize> {
        let watches = self.store.list_all_watches().await?;

        let spawned = watches
            .into_iter()
            .filter(|(user_id, watch)| self.spawn_task(user_id.clone(), watch.url.clone()))
            .count();

        info!("recovered {spawned} monitor tasks");
        Ok(spawned)
    }

    #[instrument(skip(self), fields(user = %user_id))]
    async fn resume_user(&mut self, user_id: &UserId) -> MonitorResult<usize> {
        let aggregate = match self.store.load_aggregate(user_id).await {
            Ok(aggregate) => aggregate,
            Err(StorageError::NotFound(_)) => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let spawned = aggregate
            .urls
            .into_iter()
            .filter(|watch| self.spawn_task(user_id.clone(), watch.url.clone()))
            .count();

        debug!("resumed {spawned} monitor tasks");
        Ok(spawned)
    }

    /// Spawn a task unless one is already running for the pair
    fn spawn_task(&mut self, user_id: UserId, url: String) -> bool {
        let key = (user_id, url);
        if self.is_running(&key) {
            return false;
        }

        let task = MonitorTask::new(
            key.0.clone(),
            key.1.clone(),
            self.store.clone(),
            self.prober.clone(),
            self.settings.persist_retries,
        );
        let handle = MonitorHandle::spawn(task, &self.settings, self.event_tx.clone());
        self.tasks.insert(key, handle);

        true
    }

    fn is_running(&self, key: &TaskKey) -> bool {
        self.tasks
            .get(key)
            .is_some_and(|handle| handle.state() == TaskState::Active)
    }

    fn prune_finished(&mut self) {
        self.tasks.retain(|_, handle| handle.state() == TaskState::Active);
    }

    async fn stop_all(&mut self) {
        let handles: Vec<_> = self.tasks.drain().map(|(_, handle)| handle).collect();
        debug!("stopping {} monitor tasks", handles.len());

        join_all(
            handles
                .into_iter()
                .map(|handle| handle.stop(StopReason::SupervisorShutdown)),
        )
        .await;
    }
}

/// Handle for controlling the SupervisorActor
#[derive(Clone)]
pub struct SupervisorHandle {
    sender: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    /// Spawn the supervisor; monitor tasks publish into `event_tx`
    pub fn spawn(
        store: Arc<dyn AggregateStore>,
        prober: Arc<dyn Prober>,
        settings: MonitorSettings,
        event_tx: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SupervisorActor::new(store, prober, settings, cmd_rx, event_tx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SupervisorCommand,
    ) -> MonitorResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| MonitorError::SupervisorUnavailable)?;

        rx.await.map_err(|_| MonitorError::SupervisorUnavailable)
    }

    /// Persist a new watch and start monitoring it
    pub async fn register(
        &self,
        user_id: UserId,
        url: impl Into<String>,
        threshold: u32,
    ) -> MonitorResult<WatchedUrl> {
        let url = url.into();
        self.request(|respond_to| SupervisorCommand::Register {
            user_id,
            url,
            threshold,
            respond_to,
        })
        .await?
    }

    /// Delete a watch and wait until its task has stopped
    pub async fn remove(&self, user_id: UserId, url: impl Into<String>) -> MonitorResult<()> {
        let url = url.into();
        self.request(|respond_to| SupervisorCommand::Remove {
            user_id,
            url,
            respond_to,
        })
        .await?
    }

    /// Start a task for every persisted watch; returns how many were started
    pub async fn recover(&self) -> MonitorResult<usize> {
        self.request(|respond_to| SupervisorCommand::Recover { respond_to })
            .await?
    }

    pub async fn resume_user(&self, user_id: UserId) -> MonitorResult<usize> {
        self.request(|respond_to| SupervisorCommand::ResumeUser {
            user_id,
            respond_to,
        })
        .await?
    }

    pub async fn running(&self) -> MonitorResult<Vec<(UserId, String)>> {
        self.request(|respond_to| SupervisorCommand::Running { respond_to })
            .await
    }

    /// Stop every monitor task and the supervisor itself
    pub async fn shutdown(&self) -> MonitorResult<()> {
        self.request(|respond_to| SupervisorCommand::Shutdown { respond_to })
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================
