//! Error taxonomy of the monitoring engine
//!
//! - `ValidationError`: rejected synchronously at registration, never reaches a task
//! - `MonitorError::PersistenceConflict`: retries against concurrent writers exhausted
//! - `MonitorError::StoreUnavailable`: the task backs off and retries the tick
//!
//! Transport errors of a probe are not errors at all here; they are
//! [`ProbeOutcome::TransportError`](crate::probe::ProbeOutcome) values.

use std::fmt;

use crate::storage::StorageError;

/// Result type alias for engine operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Reasons a registration request is rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The user already watches this URL
    DuplicateUrl(String),

    /// The user already holds the maximum number of watches
    QuotaExceeded { max: usize },

    /// Threshold outside the accepted range
    InvalidThreshold { threshold: u32, max: u32 },

    /// Not an absolute http(s) URL
    InvalidUrl(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::DuplicateUrl(url) => write!(f, "url {} is already watched", url),
            ValidationError::QuotaExceeded { max } => {
                write!(f, "a user can watch at most {} urls", max)
            }
            ValidationError::InvalidThreshold { threshold, max } => write!(
                f,
                "threshold {} is out of range (expected 1..={})",
                threshold, max
            ),
            ValidationError::InvalidUrl(msg) => write!(f, "invalid url: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors surfaced by monitor tasks, the supervisor and the watch service
#[derive(Debug)]
pub enum MonitorError {
    /// Registration input rejected
    Validation(ValidationError),

    /// The user does not watch this URL
    UrlNotFound(String),

    /// Optimistic update kept conflicting with concurrent writers
    PersistenceConflict { url: String, attempts: u32 },

    /// The store could not be reached
    StoreUnavailable(StorageError),

    /// Any other storage failure
    Storage(StorageError),

    /// The monitor task for this URL has exited
    TaskStopped(String),

    /// The supervisor actor is gone (process shutting down)
    SupervisorUnavailable,
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Validation(err) => write!(f, "validation failed: {}", err),
            MonitorError::UrlNotFound(url) => write!(f, "url {} is not watched", url),
            MonitorError::PersistenceConflict { url, attempts } => write!(
                f,
                "gave up persisting tick for {} after {} conflicting attempts",
                url, attempts
            ),
            MonitorError::StoreUnavailable(err) => write!(f, "store unavailable: {}", err),
            MonitorError::Storage(err) => write!(f, "storage error: {}", err),
            MonitorError::TaskStopped(url) => write!(f, "monitor task for {} has stopped", url),
            MonitorError::SupervisorUnavailable => write!(f, "monitor supervisor is not running"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Validation(err) => Some(err),
            MonitorError::StoreUnavailable(err) | MonitorError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for MonitorError {
    fn from(err: ValidationError) -> Self {
        MonitorError::Validation(err)
    }
}

impl From<StorageError> for MonitorError {
    fn from(err: StorageError) -> Self {
        if err.is_transient() {
            MonitorError::StoreUnavailable(err)
        } else {
            MonitorError::Storage(err)
        }
    }
}
