//! # Networking Error Types

use thiserror::Error;

use crate::protocol::ProtocolError;

/// Errors raised by the coordination server and client.
#[derive(Error, Debug)]
pub enum NetError {
    /// Socket level failure.
    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A server setting that cannot be applied.
    #[error("invalid server configuration: {0}")]
    InvalidConfig(String),

    /// A peer name that cannot be framed on the wire.
    #[error("invalid peer name: {0}")]
    InvalidName(String),

    /// A transfer request that cannot be sent.
    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    /// The connection to the server is closed.
    #[error("not connected to the coordination server")]
    NotConnected,
}

impl From<ProtocolError> for NetError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidName(name) => Self::InvalidName(name),
            other => Self::InvalidTransfer(other.to_string()),
        }
    }
}

/// Result type for networking operations.
pub type NetResult<T> = Result<T, NetError>;
