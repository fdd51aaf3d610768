//! # Application Error Types

use aviary_core::{PopulationError, WorkerError};
use aviary_networking::NetError;
use thiserror::Error;

/// Errors surfaced by the session and its console.
#[derive(Error, Debug)]
pub enum AppError {
    /// Rejected by the population store.
    #[error(transparent)]
    Population(#[from] PopulationError),

    /// A worker failed to start.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Coordination network failure.
    #[error(transparent)]
    Net(#[from] NetError),

    /// Unreadable or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unreadable or inconsistent snapshot file.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Unknown command, bad arguments or wrong session state.
    #[error("{0}")]
    Command(String),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for session operations.
pub type AppResult<T> = Result<T, AppError>;
