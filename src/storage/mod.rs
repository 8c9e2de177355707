//! Aggregate store adapters
//!
//! The monitoring engine never owns user aggregates; it reads working copies and
//! writes back through the `AggregateStore` trait.
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database, survives restarts
//! - **In-Memory**: No persistence, for testing or ephemeral deployments
//!
//! ## Usage
//!
//! ```no_run
//! use httpmon::storage::{AggregateStore, Retention, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./httpmon.db", Retention::default()).await?;
//!     let watches = backend.list_all_watches().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{AggregateStore, HealthStatus, InsertOutcome, Retention, TickUpdate};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
