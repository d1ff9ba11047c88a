//! Error types for upstream operations
//!
//! Display strings matter here: the dispatcher classifies failures by
//! substring matching on the rendered message, so each variant's prefix is
//! chosen to land in the right classification bucket.

/// Errors from upstream client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Deadline(#[from] common::DeadlineExceeded),

    #[error("decode error: {0}")]
    Decode(String),
}

/// Result alias for upstream operations.
pub type Result<T> = std::result::Result<T, Error>;
