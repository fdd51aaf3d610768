//! # Core Error Types
//!
//! All errors that can occur in the population store and the periodic workers.

use thiserror::Error;

/// Errors raised by population store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PopulationError {
    /// A generation parameter is out of its allowed range.
    #[error("invalid configuration: {field} {reason}")]
    InvalidConfiguration {
        /// Name of the offending parameter.
        field: &'static str,
        /// What the parameter must satisfy.
        reason: &'static str,
    },

    /// An operation argument is out of its allowed range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A state blob handed to `restore` is internally inconsistent.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}

/// Result type for population operations.
pub type PopulationResult<T> = Result<T, PopulationError>;

/// Errors raised by periodic worker lifecycle calls.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// `start` was called on a worker that already left the idle state.
    #[error("worker {0} already started")]
    AlreadyStarted(String),

    /// `start` was called on a worker that was stopped before it ran.
    #[error("worker {0} already stopped")]
    AlreadyStopped(String),

    /// The OS refused to spawn the worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Error reported by a worker tick callback.
///
/// The worker logs it and keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("tick failed: {0}")]
pub struct TickError(pub String);

impl TickError {
    /// Creates a tick error from any displayable cause.
    pub fn new(cause: impl std::fmt::Display) -> Self {
        Self(cause.to_string())
    }
}
