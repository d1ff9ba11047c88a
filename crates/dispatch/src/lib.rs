//! Request dispatch for the scraping gateway
//!
//! The core of the service: a bounded priority admission queue, a per-account
//! health state machine with a sliding rate-limit window, the account
//! selection policy, and the scheduler that binds an account to a proxy for
//! the duration of one operation and retries transient failures.
//!
//! Request lifecycle:
//! 1. `Dispatcher::execute` admits the operation into the [`PriorityQueue`]
//!    (or fails fast when the queue is full)
//! 2. the scheduler loop pops under the concurrency cap
//! 3. [`HealthRegistry::select`] picks the best eligible account
//! 4. the [`ClientFactory`](upstream::ClientFactory) authenticates it against
//!    an optionally-proxied client
//! 5. the caller's thunk runs under its operation-class deadline
//! 6. the outcome feeds back into the health registry; transient failures
//!    retry with a fresh account/proxy pairing and exponential backoff

pub mod classify;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod queue;

pub use classify::{ErrorKind, classify, external_status, is_transient, truncate_message};
pub use dispatcher::{DispatchConfig, Dispatcher, Stats, TimeoutConfig};
pub use error::{Error, Result};
pub use health::{AccountHealth, AccountStatus, HealthConfig, HealthRegistry};
pub use queue::Priority;
