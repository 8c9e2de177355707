//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: Broadcast notifications published to multiple subscribers
//! 3. **Stop signals**: Delivered out of band so they interrupt an in-flight tick

use tokio::sync::oneshot;

use crate::{
    AlertEvent, ProbeRecord, UserId, WatchCounters, WatchedUrl,
    error::MonitorResult,
    monitors::FailureEvaluation,
    probe::ProbeOutcome,
};

/// Lifecycle state of a monitor task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Running, the URL is still registered
    Active,

    /// Exited; never restarts
    Stopped,
}

/// Why a monitor task exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The URL was removed through the supervisor
    Cancelled,

    /// The task found its URL gone from the store
    Unregistered,

    /// The supervisor shut down
    SupervisorShutdown,
}

/// What one completed tick did
#[derive(Debug, Clone)]
pub struct TickReport {
    pub outcome: ProbeOutcome,

    /// The history entry that was appended
    pub record: ProbeRecord,

    /// Counters after the tick
    pub counters: WatchCounters,

    pub evaluation: FailureEvaluation,

    /// Set when this tick crossed the threshold
    pub alert: Option<AlertEvent>,

    /// Watch version after the update
    pub version: u64,
}

/// Result of a single tick
#[derive(Debug, Clone)]
pub enum TickOutcome {
    Completed(TickReport),

    /// The URL is no longer registered; the task stops
    Unregistered,
}

/// Runtime statistics of one monitor task
#[derive(Debug, Clone, Default)]
pub struct TaskStats {
    pub ticks_completed: u64,

    /// Store outages in a row, drives the backoff
    pub consecutive_store_failures: u32,

    pub last_report: Option<TickReport>,
}

/// Event broadcast by monitor tasks
///
/// Subscribers (alert delivery, tests, ...) may lag; the store is the durable record.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Probed {
        user_id: UserId,
        url: String,
        report: TickReport,
    },

    Stopped {
        user_id: UserId,
        url: String,
        reason: StopReason,
    },
}

/// Commands that can be sent to a MonitorActor
#[derive(Debug)]
pub enum MonitorCommand {
    /// Run a tick immediately (bypassing the interval timer)
    ///
    /// Used for testing and manual refresh operations.
    TickNow {
        respond_to: oneshot::Sender<MonitorResult<TickOutcome>>,
    },

    GetStats {
        respond_to: oneshot::Sender<TaskStats>,
    },
}

/// Commands that can be sent to the SupervisorActor
#[derive(Debug)]
pub enum SupervisorCommand {
    Register {
        user_id: UserId,
        url: String,
        threshold: u32,
        respond_to: oneshot::Sender<MonitorResult<WatchedUrl>>,
    },

    Remove {
        user_id: UserId,
        url: String,
        respond_to: oneshot::Sender<MonitorResult<()>>,
    },

    /// Spawn tasks for every persisted watch (process start)
    Recover {
        respond_to: oneshot::Sender<MonitorResult<usize>>,
    },

    /// Spawn tasks for one user's persisted watches that are not running
    ResumeUser {
        user_id: UserId,
        respond_to: oneshot::Sender<MonitorResult<usize>>,
    },

    /// List the (user, url) pairs with an active task
    Running {
        respond_to: oneshot::Sender<Vec<(UserId, String)>>,
    },

    /// Stop every task and exit
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Commands that can be sent to the AlertActor
#[derive(Debug)]
pub enum AlertCommand {
    /// Suppress delivery (alerts are still logged in the store)
    Mute,

    Unmute,

    GetStats {
        respond_to: oneshot::Sender<AlertStats>,
    },

    Shutdown,
}

/// Alert delivery statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertStats {
    pub delivered: u64,

    /// Rejected by the receiver or not reachable
    pub failed: u64,

    /// Dropped while muted
    pub suppressed: u64,
    pub muted: bool,
}
