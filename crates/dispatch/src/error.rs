//! Error types for dispatch operations
//!
//! The admission messages are part of the external contract and must stay
//! literal: callers and tests match on them.

use crate::classify::{self, ErrorKind};

/// Errors surfaced to callers of the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Request queue is full")]
    QueueFull,

    #[error("No usable accounts available")]
    NoAccounts,

    /// A classified upstream failure. The message is already truncated.
    #[error("{message}")]
    Upstream { kind: ErrorKind, message: String },

    #[error("dispatcher stopped before the request completed")]
    Shutdown,

    #[error("account reload failed: {0}")]
    Reload(String),
}

impl Error {
    /// HTTP status the gateway presents for this error.
    pub fn external_status(&self) -> u16 {
        match self {
            Error::QueueFull | Error::NoAccounts => 503,
            Error::Upstream { kind, .. } => classify::external_status(*kind),
            Error::Shutdown | Error::Reload(_) => 500,
        }
    }
}

/// Result alias for dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;
