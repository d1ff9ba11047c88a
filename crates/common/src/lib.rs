//! Shared building blocks for the scraping gateway
//!
//! Kept deliberately small: the common error type used by configuration and
//! file loading, and the named-deadline wrapper every external call goes
//! through.

pub mod error;
pub mod timeout;

pub use error::{Error, Result};
pub use timeout::{DeadlineExceeded, with_timeout};
