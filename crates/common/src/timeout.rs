//! Named deadlines for external calls
//!
//! Every call that leaves the process (upstream requests, login, the user
//! thunk) is raced against a named deadline. The error message is load-bearing:
//! the failure classifier keys on the "timed out" text, and callers surface the
//! message verbatim, so the format here must stay stable.

use std::future::Future;
use std::time::Duration;

/// A named operation exceeded its deadline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name} timed out after {ms}ms")]
pub struct DeadlineExceeded {
    pub name: String,
    pub ms: u64,
}

/// Race `fut` against a deadline of `ms` milliseconds.
///
/// Completes with the future's output if it settles in time. On expiry the
/// inner future is dropped (best-effort cancellation) and the caller observes
/// `DeadlineExceeded` with the literal message `"<name> timed out after <ms>ms"`.
pub async fn with_timeout<F, T>(fut: F, ms: u64, name: &str) -> Result<T, DeadlineExceeded>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(Duration::from_millis(ms), fut).await {
        Ok(value) => Ok(value),
        Err(_) => Err(DeadlineExceeded {
            name: name.to_string(),
            ms,
        }),
    }
}
