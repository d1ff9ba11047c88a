//! Flat-file stores for the scraping gateway
//!
//! Three small stores back the dispatcher:
//! - [`AccountStore`] loads upstream account credentials from a colon-separated
//!   flat file and serves defensive copies to the selection policy.
//! - [`CookieCache`] persists per-account session cookies as a JSON array,
//!   upserted by username on every fresh authentication.
//! - [`ProxyStore`] loads HTTP proxies and serves a uniformly-random pick.
//!
//! The stores own their records; health bookkeeping elsewhere refers to
//! accounts by username only, so a reload never dangles a reference.

pub mod accounts;
pub mod cookies;
pub mod error;
pub mod proxies;

pub use accounts::{Account, AccountStore};
pub use cookies::{CookieCache, CookieEntry};
pub use error::{Error, Result};
pub use proxies::{Proxy, ProxyStore};
