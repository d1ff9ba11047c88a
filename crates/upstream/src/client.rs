//! The upstream client trait and transfer types
//!
//! The trait is dyn-compatible (`Pin<Box<dyn Future>>` returns) so the
//! dispatcher can hand `Arc<dyn UpstreamClient>` to user thunks without
//! knowing which implementation is behind it.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Boxed future alias used across the dyn-compatible traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single post as returned by the scraping operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub username: String,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub retweets: u64,
    #[serde(default)]
    pub is_reply: bool,
}

/// A user profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub following: u64,
    #[serde(default)]
    pub tweets: u64,
}

/// A follower/following list entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Search result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    Latest,
    Top,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Latest => "latest",
            SearchMode::Top => "top",
        }
    }

    /// Parse the query-string form; anything unrecognized is `None`.
    pub fn parse(value: &str) -> Option<SearchMode> {
        match value {
            "latest" => Some(SearchMode::Latest),
            "top" => Some(SearchMode::Top),
            _ => None,
        }
    }
}

/// Credentials handed to the ladder's final login step.
#[derive(Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
    pub email: String,
    pub totp_secret: Option<String>,
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("email", &self.email)
            .field("totp_secret", &self.totp_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A session-capable client for the upstream site.
///
/// The protocol behind these operations is deliberately opaque: the dispatcher
/// only needs session management (cookies, login, `user_id` as a cheap verify
/// probe) and the read-only scraping calls the gateway routes map onto.
pub trait UpstreamClient: Send + Sync + std::fmt::Debug {
    /// Replace the client's cookie set.
    fn set_cookies<'a>(&'a self, cookies: &'a [String]) -> BoxFuture<'a, ()>;

    /// The client's current cookie set.
    fn cookies(&self) -> BoxFuture<'_, Vec<String>>;

    /// Credential login. On success the session cookies are installed.
    fn login<'a>(&'a self, credentials: &'a LoginCredentials) -> BoxFuture<'a, Result<()>>;

    /// Resolve a screen name to a user id. Doubles as the session probe: a
    /// non-empty id for a known public screen name means the session works.
    fn user_id<'a>(&'a self, screen_name: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    /// Most recent tweets for a user, newest first.
    fn tweets<'a>(&'a self, screen_name: &'a str, count: usize)
    -> BoxFuture<'a, Result<Vec<Tweet>>>;

    /// The single most recent tweet for a user.
    fn latest_tweet<'a>(&'a self, screen_name: &'a str) -> BoxFuture<'a, Result<Option<Tweet>>>;

    /// Tweets including replies, newest first.
    fn tweets_and_replies<'a>(
        &'a self,
        screen_name: &'a str,
        count: usize,
    ) -> BoxFuture<'a, Result<Vec<Tweet>>>;

    /// Full-text search.
    fn search<'a>(
        &'a self,
        query: &'a str,
        count: usize,
        mode: SearchMode,
    ) -> BoxFuture<'a, Result<Vec<Tweet>>>;

    /// A user's profile.
    fn profile<'a>(&'a self, screen_name: &'a str) -> BoxFuture<'a, Result<Profile>>;

    /// A user's followers.
    fn followers<'a>(
        &'a self,
        screen_name: &'a str,
        count: usize,
    ) -> BoxFuture<'a, Result<Vec<UserSummary>>>;

    /// Accounts a user follows.
    fn following<'a>(
        &'a self,
        screen_name: &'a str,
        count: usize,
    ) -> BoxFuture<'a, Result<Vec<UserSummary>>>;

    /// A single tweet by id.
    fn tweet<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Tweet>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_mode_parses_query_forms() {
        assert_eq!(SearchMode::parse("latest"), Some(SearchMode::Latest));
        assert_eq!(SearchMode::parse("top"), Some(SearchMode::Top));
        assert_eq!(SearchMode::parse("weird"), None);
    }

    #[test]
    fn login_credentials_debug_redacts_password() {
        let creds = LoginCredentials {
            username: "alice".into(),
            password: "hunter2".into(),
            email: "a@b.com".into(),
            totp_secret: Some("SECRET".into()),
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"), "password leaked: {debug}");
        assert!(!debug.contains("SECRET"), "totp secret leaked: {debug}");
    }

    #[test]
    fn tweet_deserializes_with_missing_optional_fields() {
        let tweet: Tweet =
            serde_json::from_str(r#"{"id":"1","username":"alice","text":"hi"}"#).unwrap();
        assert_eq!(tweet.likes, 0);
        assert!(!tweet.is_reply);
        assert_eq!(tweet.created_at, None);
    }
}
