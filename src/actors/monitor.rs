//! MonitorActor - Watches a single URL of a single user
//!
//! One actor runs per registered `(user, url)` pair. Every tick it reloads the
//! watch from the store, probes the URL once and persists the outcome together
//! with the updated counters in one version-guarded write.
//!
//! ## Key Features
//!
//! 1. **Store-driven lifecycle** - A tick that finds its URL gone ends the task
//! 2. **Optimistic persistence** - Version conflicts reload and re-apply the same outcome
//! 3. **Backoff** - Store outages stretch the tick interval exponentially
//! 4. **Broadcast pattern** - Publishes MonitorEvent to multiple consumers
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → load watch → probe → evaluate → persist (version-guarded) → Publish MonitorEvent → [AlertActor, ...]
//!     ↑                                            │
//!     │                                            └─ conflict: reload watch, re-apply outcome
//!     ├─── Commands (TickNow, GetStats)
//!     └─── Stop signal (interrupts an in-flight tick)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, instrument, trace, warn};

use crate::{
    AlertEvent, ProbeRecord, UserId,
    config::MonitorSettings,
    error::{MonitorError, MonitorResult},
    probe::Prober,
    storage::{AggregateStore, StorageError, TickUpdate},
};

use super::messages::{
    MonitorCommand, MonitorEvent, StopReason, TaskState, TaskStats, TickOutcome, TickReport,
};

/// The unit of work of a monitor: one probe, one persisted outcome
pub struct MonitorTask {
    user_id: UserId,
    url: String,
    store: Arc<dyn AggregateStore>,
    prober: Arc<dyn Prober>,

    /// Extra attempts after the first write lost a version race
    persist_retries: u32,
}

impl MonitorTask {
    pub fn new(
        user_id: UserId,
        url: impl Into<String>,
        store: Arc<dyn AggregateStore>,
        prober: Arc<dyn Prober>,
        persist_retries: u32,
    ) -> Self {
        Self {
            user_id,
            url: url.into(),
            store,
            prober,
            persist_retries,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run one tick
    ///
    /// 1. Load the watch; if it is gone, report [`TickOutcome::Unregistered`]
    /// 2. Probe the URL once
    /// 3. Apply the outcome to the counters
    /// 4. Persist history entry, counters and alert in one version-guarded write
    ///
    /// On a version conflict the watch is reloaded and the same outcome is applied
    /// again; the URL is never probed twice within a tick. Store errors leave
    /// the persisted state untouched.
    #[instrument(skip(self), fields(user = %self.user_id, url = %self.url))]
    pub async fn tick(&self) -> MonitorResult<TickOutcome> {
        let Some(mut watch) = self.store.load_watch(&self.user_id, &self.url).await? else {
            debug!("url is no longer registered");
            return Ok(TickOutcome::Unregistered);
        };

        let outcome = self.prober.probe(&self.url).await;
        let record = ProbeRecord::new(watch.snapshot(), &outcome, Utc::now());

        let mut attempts = 0;
        loop {
            attempts += 1;

            let mut counters = watch.counters();
            let evaluation = counters.apply(&outcome, watch.threshold);
            let alert = evaluation
                .raises_alert()
                .then(|| AlertEvent::from(record.clone()));

            let update = TickUpdate {
                user_id: self.user_id.clone(),
                url: self.url.clone(),
                expected_version: watch.version,
                counters,
                record: record.clone(),
                alert: alert.clone(),
            };

            match self.store.append_probe_and_update_counters(&update).await {
                Ok(version) => {
                    if alert.is_some() {
                        warn!(
                            "{} consecutive failures, alert raised (last status: {:?})",
                            watch.threshold,
                            outcome.status_code()
                        );
                    }

                    return Ok(TickOutcome::Completed(TickReport {
                        outcome,
                        record,
                        counters,
                        evaluation,
                        alert,
                        version,
                    }));
                }
                Err(StorageError::VersionConflict {
                    expected, actual, ..
                }) if attempts <= self.persist_retries => {
                    debug!(
                        "version conflict (expected {expected}, found {actual}), retry {attempts}/{}",
                        self.persist_retries
                    );
                    match self.store.load_watch(&self.user_id, &self.url).await? {
                        Some(fresh) => watch = fresh,
                        None => return Ok(TickOutcome::Unregistered),
                    }
                }
                Err(StorageError::VersionConflict { .. }) => {
                    return Err(MonitorError::PersistenceConflict {
                        url: self.url.clone(),
                        attempts,
                    });
                }
                Err(StorageError::WatchNotFound { .. }) => {
                    debug!("url was removed while probing");
                    return Ok(TickOutcome::Unregistered);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Delay before the next tick after `failures` consecutive store outages
///
/// Doubles the interval per outage, bounded by `max_backoff` (but never below
/// the regular interval).
pub fn backoff_delay(interval: Duration, max_backoff: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return interval;
    }

    let factor = 1u32 << failures.min(16);
    interval.saturating_mul(factor).min(max_backoff.max(interval))
}

/// Actor that schedules ticks of one [`MonitorTask`]
pub struct MonitorActor {
    task: MonitorTask,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<MonitorCommand>,

    /// Set to `Some(reason)` by the handle to stop the task
    stop_rx: watch::Receiver<Option<StopReason>>,

    /// Broadcast sender for publishing tick results
    event_tx: broadcast::Sender<MonitorEvent>,

    interval: Duration,
    max_backoff: Duration,
    stats: TaskStats,
}

impl MonitorActor {
    pub fn new(
        task: MonitorTask,
        settings: &MonitorSettings,
        command_rx: mpsc::Receiver<MonitorCommand>,
        stop_rx: watch::Receiver<Option<StopReason>>,
        event_tx: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        Self {
            task,
            command_rx,
            stop_rx,
            event_tx,
            interval: settings.interval(),
            max_backoff: settings.max_backoff(),
            stats: TaskStats::default(),
        }
    }

    /// Run the actor's main loop
    ///
    /// The first tick fires immediately. The loop exits when:
    /// - The stop signal is raised (or its sender dropped)
    /// - A tick finds the URL unregistered
    #[instrument(skip(self), fields(user = %self.task.user_id, url = %self.task.url))]
    pub async fn run(mut self) -> StopReason {
        debug!("starting monitor actor");

        let sleep = time::sleep(Duration::ZERO);
        tokio::pin!(sleep);

        let reason = loop {
            tokio::select! {
                biased;

                _ = self.stop_rx.changed() => break self.requested_stop(),

                _ = &mut sleep => {
                    let Some(result) = self.tick_unless_stopped().await else {
                        break self.requested_stop();
                    };
                    match self.after_tick(&result) {
                        Some(delay) => sleep.as_mut().reset(Instant::now() + delay),
                        None => break StopReason::Unregistered,
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        MonitorCommand::TickNow { respond_to } => {
                            debug!("received TickNow command");
                            let Some(result) = self.tick_unless_stopped().await else {
                                break self.requested_stop();
                            };
                            let next = self.after_tick(&result);
                            let _ = respond_to.send(result);
                            if next.is_none() {
                                break StopReason::Unregistered;
                            }
                        }

                        MonitorCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats.clone());
                        }
                    }
                }
            }
        };

        let _ = self.event_tx.send(MonitorEvent::Stopped {
            user_id: self.task.user_id.clone(),
            url: self.task.url.clone(),
            reason,
        });
        debug!("monitor actor stopped ({reason:?})");

        reason
    }

    /// Run a tick, abandoning it if the stop signal arrives first
    ///
    /// Abandoning is safe: the persisted write is a single atomic operation.
    async fn tick_unless_stopped(&mut self) -> Option<MonitorResult<TickOutcome>> {
        tokio::select! {
            biased;
            _ = self.stop_rx.changed() => None,
            result = self.task.tick() => Some(result),
        }
    }

    fn requested_stop(&self) -> StopReason {
        let requested = *self.stop_rx.borrow();
        requested.unwrap_or(StopReason::Cancelled)
    }

    /// Book-keeping after a tick; returns the delay until the next one, `None` to stop
    fn after_tick(&mut self, result: &MonitorResult<TickOutcome>) -> Option<Duration> {
        match result {
            Ok(TickOutcome::Completed(report)) => {
                self.stats.ticks_completed += 1;
                self.stats.consecutive_store_failures = 0;
                self.stats.last_report = Some(report.clone());

                let event = MonitorEvent::Probed {
                    user_id: self.task.user_id.clone(),
                    url: self.task.url.clone(),
                    report: report.clone(),
                };
                if self.event_tx.send(event).is_err() {
                    trace!("no subscribers for monitor events");
                }

                Some(self.interval)
            }
            Ok(TickOutcome::Unregistered) => None,
            Err(MonitorError::StoreUnavailable(e)) => {
                self.stats.consecutive_store_failures += 1;
                let delay = backoff_delay(
                    self.interval,
                    self.max_backoff,
                    self.stats.consecutive_store_failures,
                );
                warn!(
                    "store unavailable ({} in a row), next tick in {:?}: {}",
                    self.stats.consecutive_store_failures, delay, e
                );
                Some(delay)
            }
            Err(e) => {
                error!("tick failed: {}", e);
                Some(self.interval)
            }
        }
    }
}

/// Handle for controlling a MonitorActor
///
/// Owned by the supervisor; stopping consumes it.
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
    stop_tx: watch::Sender<Option<StopReason>>,
    join: JoinHandle<StopReason>,
    user_id: UserId,
    url: String,
}

impl MonitorHandle {
    /// Spawn a new monitor actor
    pub fn spawn(
        task: MonitorTask,
        settings: &MonitorSettings,
        event_tx: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (stop_tx, stop_rx) = watch::channel(None);
        let user_id = task.user_id.clone();
        let url = task.url.clone();

        let actor = MonitorActor::new(task, settings, cmd_rx, stop_rx, event_tx);
        let join = tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            stop_tx,
            join,
            user_id,
            url,
        }
    }

    /// Run a tick immediately, outside the regular schedule
    pub async fn tick_now(&self) -> MonitorResult<TickOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::TickNow { respond_to: tx })
            .await
            .map_err(|_| MonitorError::TaskStopped(self.url.clone()))?;

        rx.await
            .map_err(|_| MonitorError::TaskStopped(self.url.clone()))?
    }

    pub async fn stats(&self) -> MonitorResult<TaskStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::GetStats { respond_to: tx })
            .await
            .map_err(|_| MonitorError::TaskStopped(self.url.clone()))?;

        rx.await
            .map_err(|_| MonitorError::TaskStopped(self.url.clone()))
    }

    pub fn state(&self) -> TaskState {
        if self.join.is_finished() {
            TaskState::Stopped
        } else {
            TaskState::Active
        }
    }

    /// Stop the task and wait until it has exited
    ///
    /// Returns why the task actually ended, which may differ from `reason` if it
    /// had already stopped on its own.
    pub async fn stop(self, reason: StopReason) -> StopReason {
        let _ = self.stop_tx.send(Some(reason));

        match self.join.await {
            Ok(stopped) => stopped,
            Err(e) => {
                error!("monitor task for {} failed: {}", self.url, e);
                reason
            }
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

// ============================================================================
// Tests
// ============================================================================
