//! Client factory and the authentication ladder
//!
//! Binds an account to a proxy for the duration of one dispatch attempt. The
//! ladder tries the cheapest session material first and short-circuits on the
//! first step that verifies:
//!
//! 1. cookies cached from a previous session
//! 2. the account's pre-obtained `ct0`/`auth_token` pair, installed as
//!    domain cookies
//! 3. a full credential login under the login-class deadline
//!
//! Verification is one trivial upstream call (resolve a known public screen
//! name) under a short deadline; whichever step wins, the resulting cookie
//! set is written back to the cache. The steps are deliberately sequential:
//! each short-circuits on success and the login step is expensive.

use std::sync::Arc;

use common::with_timeout;
use stores::{Account, CookieCache, Proxy};
use tracing::{debug, warn};

use crate::client::{BoxFuture, LoginCredentials, UpstreamClient};
use crate::error::{Error, Result};
use crate::http::HttpUpstreamClient;

/// Deadline for the session verify probe.
const VERIFY_TIMEOUT_MS: u64 = 15_000;

/// Produces an authenticated client for an account/proxy pairing.
///
/// Dyn-compatible so the dispatcher can hold `Arc<dyn ClientFactory>` and
/// tests can substitute scripted factories.
pub trait ClientFactory: Send + Sync {
    fn client<'a>(
        &'a self,
        account: &'a Account,
        proxy: Option<&'a Proxy>,
    ) -> BoxFuture<'a, Result<Arc<dyn UpstreamClient>>>;
}

/// The production factory: per-attempt reqwest client plus the auth ladder.
pub struct AuthFactory {
    base_url: String,
    cookie_domain: String,
    cookie_cache: Arc<CookieCache>,
    verify_screen_name: String,
    login_timeout_ms: u64,
}

impl AuthFactory {
    /// `verify_screen_name` must resolve for any working session (a known
    /// public account). `login_timeout_ms` is the login-class deadline.
    pub fn new(
        base_url: &str,
        cookie_cache: Arc<CookieCache>,
        verify_screen_name: &str,
        login_timeout_ms: u64,
    ) -> Result<Self> {
        let url = reqwest::Url::parse(base_url)
            .map_err(|e| Error::Network(format!("invalid upstream base url: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Network("upstream base url has no host".into()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie_domain: format!(".{host}"),
            cookie_cache,
            verify_screen_name: verify_screen_name.to_string(),
            login_timeout_ms,
        })
    }

    async fn authenticate(
        &self,
        account: &Account,
        proxy: Option<&Proxy>,
    ) -> Result<Arc<dyn UpstreamClient>> {
        let client: Arc<dyn UpstreamClient> =
            Arc::new(HttpUpstreamClient::new(&self.base_url, proxy)?);
        let mut last_err = Error::Auth(format!("no usable session for {}", account.username));

        // Step 1: cookies cached from a previous session.
        if let Some(cookies) = self.cookie_cache.cookies_for(&account.username).await {
            if !cookies.is_empty() {
                client.set_cookies(&cookies).await;
                match self.verify_session(client.as_ref()).await {
                    Ok(true) => {
                        debug!(account = %account.username, "authenticated from cached cookies");
                        self.persist(account, client.as_ref()).await;
                        return Ok(client);
                    }
                    Ok(false) => {
                        last_err = Error::Auth("cached cookies no longer valid".into());
                    }
                    Err(e) => last_err = e,
                }
            }
        }

        // Step 2: pre-obtained token cookies.
        if let (Some(ct0), Some(auth_token)) = (&account.ct0, &account.auth_token) {
            client.set_cookies(&self.token_cookies(ct0, auth_token)).await;
            match self.verify_session(client.as_ref()).await {
                Ok(true) => {
                    debug!(account = %account.username, "authenticated from token cookies");
                    self.persist(account, client.as_ref()).await;
                    return Ok(client);
                }
                Ok(false) => {
                    last_err = Error::Auth("token cookies rejected by upstream".into());
                }
                Err(e) => last_err = e,
            }
        }

        // Step 3: full credential login.
        let credentials = LoginCredentials {
            username: account.username.clone(),
            password: account.password.clone(),
            email: account.email.clone(),
            totp_secret: account.totp_secret.clone(),
        };
        match with_timeout(client.login(&credentials), self.login_timeout_ms, "login").await {
            Ok(Ok(())) => match self.verify_session(client.as_ref()).await {
                Ok(true) => {
                    debug!(account = %account.username, "authenticated via credential login");
                    self.persist(account, client.as_ref()).await;
                    return Ok(client);
                }
                Ok(false) => {
                    last_err = Error::Auth("login produced an unusable session".into());
                }
                Err(e) => last_err = e,
            },
            Ok(Err(e)) => last_err = e,
            Err(deadline) => last_err = deadline.into(),
        }

        Err(last_err)
    }

    /// One trivial upstream call under a short deadline; a non-empty id means
    /// the session is usable.
    async fn verify_session(&self, client: &dyn UpstreamClient) -> Result<bool> {
        let id = with_timeout(
            client.user_id(&self.verify_screen_name),
            VERIFY_TIMEOUT_MS,
            "session verify",
        )
        .await??;
        Ok(id.is_some_and(|id| !id.is_empty()))
    }

    /// Write the client's live cookie set back to the cache. Persistence
    /// failures degrade the next startup, not this dispatch, so they only warn.
    async fn persist(&self, account: &Account, client: &dyn UpstreamClient) {
        let cookies = client.cookies().await;
        if let Err(e) = self.cookie_cache.save(account, cookies).await {
            warn!(account = %account.username, error = %e, "failed to persist session cookies");
        }
    }

    fn token_cookies(&self, ct0: &str, auth_token: &str) -> Vec<String> {
        vec![
            format!("ct0={ct0}; Domain={}; Path=/; Secure", self.cookie_domain),
            format!(
                "auth_token={auth_token}; Domain={}; Path=/; Secure; HttpOnly",
                self.cookie_domain
            ),
        ]
    }
}

impl ClientFactory for AuthFactory {
    fn client<'a>(
        &'a self,
        account: &'a Account,
        proxy: Option<&'a Proxy>,
    ) -> BoxFuture<'a, Result<Arc<dyn UpstreamClient>>> {
        Box::pin(self.authenticate(account, proxy))
    }
}
