//! Upstream client abstraction and authentication
//!
//! Decouples the dispatcher from the third-party site's protocol. The
//! [`UpstreamClient`] trait exposes the session primitives (cookies, login, a
//! trivial verify probe) plus the read-only scraping operations the HTTP
//! surface needs; [`HttpUpstreamClient`] is the reqwest-backed implementation
//! whose traffic egresses through an optional per-request proxy.
//!
//! [`AuthFactory`] binds an account to a proxy for the duration of one
//! operation by walking the authentication ladder:
//! 1. cached cookies from the cookie cache
//! 2. pre-obtained `ct0`/`auth_token` token cookies
//! 3. credential login
//!
//! Each step is verified with a short session probe before it wins; the first
//! usable session is persisted back to the cookie cache.

pub mod client;
pub mod error;
pub mod factory;
pub mod http;

pub use client::{
    BoxFuture, LoginCredentials, Profile, SearchMode, Tweet, UpstreamClient, UserSummary,
};
pub use error::{Error, Result};
pub use factory::{AuthFactory, ClientFactory};
pub use http::HttpUpstreamClient;
