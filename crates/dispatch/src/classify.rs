//! Failure classification
//!
//! Maps opaque error messages to a small set of kinds that drive the retry
//! policy and the account health state machine. Matching is case-insensitive
//! substring search against ordered rule tables; the first matching rule wins,
//! so e.g. a rate-limited response that also mentions a connection problem
//! classifies as Network, not RateLimit.

/// What went wrong, as far as dispatch policy cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    Network,
    RateLimit,
    Auth,
    NotFound,
    AccountLocked,
    Unknown,
}

impl ErrorKind {
    /// Stable label for logging, stats, and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AccountLocked => "account_locked",
            ErrorKind::Unknown => "unknown",
        }
    }
}

const TIMEOUT_PATTERNS: &[&str] = &["timeout", "timed out"];

const NETWORK_PATTERNS: &[&str] = &[
    "network",
    "fetch failed",
    "connection",
    "socket",
    "econnreset",
    "enotfound",
];

const RATE_LIMIT_PATTERNS: &[&str] = &["rate limit", "too many requests", "429"];

const AUTH_PATTERNS: &[&str] = &["unauthorized", "401", "authentication failed"];

const NOT_FOUND_PATTERNS: &[&str] = &["not found", "404"];

const LOCKED_PATTERNS: &[&str] = &["locked", "suspended", "verify your identity"];

/// User-visible messages are capped at this length so verbose upstream stack
/// traces never reach callers.
pub const MAX_MESSAGE_LEN: usize = 300;

/// Classify an error message. First matching rule wins.
pub fn classify(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if matches(TIMEOUT_PATTERNS) {
        ErrorKind::Timeout
    } else if matches(NETWORK_PATTERNS) {
        ErrorKind::Network
    } else if matches(RATE_LIMIT_PATTERNS) {
        ErrorKind::RateLimit
    } else if matches(AUTH_PATTERNS) || (lower.contains("status") && lower.contains("403")) {
        ErrorKind::Auth
    } else if matches(NOT_FOUND_PATTERNS) {
        ErrorKind::NotFound
    } else if matches(LOCKED_PATTERNS) {
        ErrorKind::AccountLocked
    } else {
        ErrorKind::Unknown
    }
}

/// Whether a failure of this kind is worth retrying, possibly with a
/// different account and proxy.
pub fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Timeout | ErrorKind::Network | ErrorKind::Unknown
    )
}

/// HTTP status presented to external callers for each kind.
pub fn external_status(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::RateLimit => 429,
        ErrorKind::Auth => 401,
        ErrorKind::NotFound => 404,
        ErrorKind::AccountLocked => 503,
        ErrorKind::Timeout | ErrorKind::Network => 502,
        ErrorKind::Unknown => 500,
    }
}

/// Cap a message at [`MAX_MESSAGE_LEN`] characters.
pub fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_LEN {
        message.to_string()
    } else {
        message.chars().take(MAX_MESSAGE_LEN).collect()
    }
}
