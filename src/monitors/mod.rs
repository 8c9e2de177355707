//! Pure per-watch state transitions, free of I/O
pub mod evaluation;

pub use evaluation::FailureEvaluation;
