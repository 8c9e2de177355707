//! Actor-based monitoring engine
//!
//! Each actor runs as an independent async task communicating via Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────┐
//!   register ─────►│   SupervisorActor    │◄───── remove / recover / resume
//!                  └──────────┬───────────┘
//!                             │ spawns / stops
//!            ┌────────────────┼────────────────┐
//!            │                │                │
//!    ┌───────▼───────┐ ┌──────▼────────┐ ┌─────▼─────────┐
//!    │ MonitorActor  │ │ MonitorActor  │ │ MonitorActor  │   one per (user, url)
//!    └───────┬───────┘ └──────┬────────┘ └─────┬─────────┘
//!            │ tick writes    │                │
//!            ├────────────────┴────────────────┤──────► AggregateStore
//!            │                                 │
//!    ┌───────▼─────────────────────────────────▼──┐
//!    │         Broadcast Channel (MonitorEvent)   │
//!    └────────────────────┬───────────────────────┘
//!                         │ subscribe
//!                  ┌──────▼──────┐
//!                  │ AlertActor  │ (webhook / Discord)
//!                  └─────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: Monitor actors publish to a broadcast channel for fan-out
//! 3. **Request/Response**: oneshot channels for synchronous queries
//! 4. **Stop signal**: a watch channel per monitor actor, observed even mid-tick

pub mod alert;
pub mod messages;
pub mod monitor;
pub mod supervisor;
