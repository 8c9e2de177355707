//! AlertActor - Delivers raised alerts to an outside channel
//!
//! Monitor tasks persist every alert in the user's alert log as part of the tick
//! write. This actor only forwards them (webhook or Discord) and can be muted
//! without affecting what is stored.
//!
//! ## Message Flow
//!
//! ```text
//! MonitorEvent::Probed { alert: Some(..) } → muted? → AlertManager::send_alert
//!     ↑
//!     └─── Commands (Mute, Unmute, GetStats, Shutdown)
//! ```

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, instrument, trace, warn};

use crate::{AlertEvent, UserId, alerts::AlertManager, config::Alert};

use super::messages::{AlertCommand, AlertStats, MonitorEvent};

pub struct AlertActor {
    /// Sends the notifications
    alert_manager: AlertManager,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<AlertCommand>,

    /// Events of all monitor tasks
    event_rx: broadcast::Receiver<MonitorEvent>,

    stats: AlertStats,
}

impl AlertActor {
    pub fn new(
        alert_manager: AlertManager,
        command_rx: mpsc::Receiver<AlertCommand>,
        event_rx: broadcast::Receiver<MonitorEvent>,
    ) -> Self {
        Self {
            alert_manager,
            command_rx,
            event_rx,
            stats: AlertStats::default(),
        }
    }

    /// Run the actor's main loop
    ///
    /// Commands are polled first so that an awaited mute or unmute applies to every
    /// event published after it. `GetStats` drains already queued events before it
    /// answers.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting alert actor");

        loop {
            tokio::select! {
                biased;

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        AlertCommand::Mute => {
                            debug!("muting alerts");
                            self.stats.muted = true;
                        }

                        AlertCommand::Unmute => {
                            debug!("unmuting alerts");
                            self.stats.muted = false;
                        }

                        AlertCommand::GetStats { respond_to } => {
                            self.drain_events().await;
                            let _ = respond_to.send(self.stats.clone());
                        }

                        AlertCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                result = self.event_rx.recv() => {
                    match result {
                        Ok(event) => self.handle_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("alert actor lagged, skipped {skipped} monitor events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("monitor event channel closed, shutting down");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("alert actor stopped");
    }

    async fn drain_events(&mut self) {
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => self.handle_event(event).await,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("alert actor lagged, skipped {skipped} monitor events");
                }
                Err(_) => break,
            }
        }
    }

    async fn handle_event(&mut self, event: MonitorEvent) {
        if let MonitorEvent::Probed { user_id, report, .. } = event {
            if let Some(alert) = report.alert {
                self.handle_alert(&user_id, &alert).await;
            }
        }
    }

    #[instrument(skip(self, alert), fields(user = %user_id, url = %alert.url.url))]
    async fn handle_alert(&mut self, user_id: &UserId, alert: &AlertEvent) {
        if self.stats.muted {
            trace!("alerts muted, not delivering");
            self.stats.suppressed += 1;
            return;
        }

        if self.alert_manager.send_alert(user_id, alert).await {
            self.stats.delivered += 1;
        } else {
            self.stats.failed += 1;
        }
    }
}

/// Handle for controlling an AlertActor
#[derive(Clone)]
pub struct AlertHandle {
    sender: mpsc::Sender<AlertCommand>,
}

impl AlertHandle {
    /// Spawn a new alert actor delivering to `target`
    pub fn spawn(target: Alert, event_rx: broadcast::Receiver<MonitorEvent>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = AlertActor::new(AlertManager::new(target), cmd_rx, event_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn mute(&self) {
        let _ = self.sender.send(AlertCommand::Mute).await;
    }

    pub async fn unmute(&self) {
        let _ = self.sender.send(AlertCommand::Unmute).await;
    }

    /// Delivery statistics, `None` once the actor has stopped
    pub async fn stats(&self) -> Option<AlertStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlertCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(AlertCommand::Shutdown).await;
    }
}
