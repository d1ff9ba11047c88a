//! reqwest-backed upstream client
//!
//! All knowledge of the upstream site's endpoint shapes lives in this module;
//! everything above it sees only the [`UpstreamClient`] trait. The client
//! keeps its session as a list of opaque cookie strings and replays them as a
//! `Cookie` header (plus the `x-csrf-token` header the upstream derives from
//! the `ct0` cookie).
//!
//! Non-success statuses surface as `Error::Status` carrying the response body,
//! which is what the dispatcher's classifier keys on.

use reqwest::header::{COOKIE, SET_COOKIE};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use stores::Proxy;
use tokio::sync::Mutex;

use crate::client::{
    BoxFuture, LoginCredentials, Profile, SearchMode, Tweet, UpstreamClient, UserSummary,
};
use crate::error::{Error, Result};

/// TCP connect timeout, distinct from the per-operation deadlines the
/// dispatcher enforces.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Presented to the upstream; scraping through the official web UA.
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: Option<String>,
}

/// HTTP implementation of [`UpstreamClient`].
///
/// One instance is built per dispatch attempt; when a proxy is supplied every
/// request egresses through it, otherwise the platform default applies.
#[derive(Debug)]
pub struct HttpUpstreamClient {
    http: reqwest::Client,
    base_url: String,
    jar: Mutex<Vec<String>>,
}

impl HttpUpstreamClient {
    /// Build a client for `base_url`, optionally routed through `proxy`.
    pub fn new(base_url: &str, proxy: Option<&Proxy>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT);
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(&proxy.url)
                .map_err(|e| Error::Network(format!("invalid proxy url: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| Error::Network(format!("building http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            jar: Mutex::new(Vec::new()),
        })
    }

    /// Render the jar as a `Cookie` header value: `name=value` pairs only,
    /// attributes stripped.
    async fn cookie_header(&self) -> String {
        let jar = self.jar.lock().await;
        jar.iter()
            .filter_map(|cookie| cookie.split(';').next())
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// The `ct0` cookie value, if present. The upstream requires it echoed
    /// back as `x-csrf-token` on authenticated calls.
    async fn csrf_token(&self) -> Option<String> {
        let jar = self.jar.lock().await;
        jar.iter()
            .filter_map(|cookie| cookie.split(';').next())
            .map(str::trim)
            .find_map(|pair| pair.strip_prefix("ct0=").map(str::to_string))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.http.get(&url).query(query);
        let cookie = self.cookie_header().await;
        if !cookie.is_empty() {
            request = request.header(COOKIE, cookie);
        }
        if let Some(token) = self.csrf_token().await {
            request = request.header("x-csrf-token", token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Decode(e.to_string()))
    }
}

impl UpstreamClient for HttpUpstreamClient {
    fn set_cookies<'a>(&'a self, cookies: &'a [String]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut jar = self.jar.lock().await;
            *jar = cookies.to_vec();
        })
    }

    fn cookies(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move { self.jar.lock().await.clone() })
    }

    fn login<'a>(&'a self, credentials: &'a LoginCredentials) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = format!("{}/i/api/login", self.base_url);
            let body = serde_json::json!({
                "username": credentials.username,
                "password": credentials.password,
                "email": credentials.email,
                "totp_secret": credentials.totp_secret,
            });
            let response = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::Network(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("<no body>"));
                return Err(Error::Auth(format!("login returned {status}: {body}")));
            }

            // The session arrives as Set-Cookie headers; adopt them wholesale.
            let cookies: Vec<String> = response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .map(str::to_string)
                .collect();
            if cookies.is_empty() {
                return Err(Error::Auth("login succeeded but set no session cookies".into()));
            }
            *self.jar.lock().await = cookies;
            Ok(())
        })
    }

    fn user_id<'a>(&'a self, screen_name: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let response: IdResponse = self
                .get_json(&format!("/i/api/users/{screen_name}/id"), &[])
                .await?;
            Ok(response.id)
        })
    }

    fn tweets<'a>(
        &'a self,
        screen_name: &'a str,
        count: usize,
    ) -> BoxFuture<'a, Result<Vec<Tweet>>> {
        Box::pin(async move {
            self.get_json(
                &format!("/i/api/users/{screen_name}/tweets"),
                &[("count", count.to_string())],
            )
            .await
        })
    }

    fn latest_tweet<'a>(&'a self, screen_name: &'a str) -> BoxFuture<'a, Result<Option<Tweet>>> {
        Box::pin(async move {
            let mut tweets: Vec<Tweet> = self
                .get_json(
                    &format!("/i/api/users/{screen_name}/tweets"),
                    &[("count", "1".to_string())],
                )
                .await?;
            Ok(if tweets.is_empty() {
                None
            } else {
                Some(tweets.remove(0))
            })
        })
    }

    fn tweets_and_replies<'a>(
        &'a self,
        screen_name: &'a str,
        count: usize,
    ) -> BoxFuture<'a, Result<Vec<Tweet>>> {
        Box::pin(async move {
            self.get_json(
                &format!("/i/api/users/{screen_name}/tweets"),
                &[
                    ("count", count.to_string()),
                    ("replies", "true".to_string()),
                ],
            )
            .await
        })
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
        count: usize,
        mode: SearchMode,
    ) -> BoxFuture<'a, Result<Vec<Tweet>>> {
        Box::pin(async move {
            self.get_json(
                "/i/api/search",
                &[
                    ("q", query.to_string()),
                    ("count", count.to_string()),
                    ("mode", mode.as_str().to_string()),
                ],
            )
            .await
        })
    }

    fn profile<'a>(&'a self, screen_name: &'a str) -> BoxFuture<'a, Result<Profile>> {
        Box::pin(async move {
            self.get_json(&format!("/i/api/users/{screen_name}/profile"), &[])
                .await
        })
    }

    fn followers<'a>(
        &'a self,
        screen_name: &'a str,
        count: usize,
    ) -> BoxFuture<'a, Result<Vec<UserSummary>>> {
        Box::pin(async move {
            self.get_json(
                &format!("/i/api/users/{screen_name}/followers"),
                &[("count", count.to_string())],
            )
            .await
        })
    }

    fn following<'a>(
        &'a self,
        screen_name: &'a str,
        count: usize,
    ) -> BoxFuture<'a, Result<Vec<UserSummary>>> {
        Box::pin(async move {
            self.get_json(
                &format!("/i/api/users/{screen_name}/following"),
                &[("count", count.to_string())],
            )
            .await
        })
    }

    fn tweet<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Tweet>> {
        Box::pin(async move { self.get_json(&format!("/i/api/tweets/{id}"), &[]).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use tokio::net::TcpListener;

    /// Start a mock upstream on an ephemeral port, returning its base URL.
    async fn start_mock(app: axum::Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn user_id_sends_cookies_and_csrf_header() {
        let app = axum::Router::new().route(
            "/i/api/users/{name}/id",
            axum::routing::get(|headers: HeaderMap| async move {
                let cookie = headers
                    .get("cookie")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                let csrf = headers
                    .get("x-csrf-token")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                if cookie.contains("auth_token=tok") && csrf == "csrfval" {
                    Json(serde_json::json!({"id": "12345"}))
                } else {
                    Json(serde_json::json!({"id": null}))
                }
            }),
        );
        let base = start_mock(app).await;

        let client = HttpUpstreamClient::new(&base, None).unwrap();
        client
            .set_cookies(&[
                "ct0=csrfval; Path=/; Secure".to_string(),
                "auth_token=tok; Path=/; Secure; HttpOnly".to_string(),
            ])
            .await;

        let id = client.user_id("support").await.unwrap();
        assert_eq!(id.as_deref(), Some("12345"));
    }

    #[tokio::test]
    async fn unauthenticated_probe_resolves_nothing() {
        let app = axum::Router::new().route(
            "/i/api/users/{name}/id",
            axum::routing::get(|| async { Json(serde_json::json!({"id": null})) }),
        );
        let base = start_mock(app).await;

        let client = HttpUpstreamClient::new(&base, None).unwrap();
        assert_eq!(client.user_id("support").await.unwrap(), None);
    }

    #[tokio::test]
    async fn non_success_status_surfaces_code_and_body() {
        let app = axum::Router::new().route(
            "/i/api/users/{name}/tweets",
            axum::routing::get(|| async {
                (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests")
            }),
        );
        let base = start_mock(app).await;

        let client = HttpUpstreamClient::new(&base, None).unwrap();
        let err = client.tweets("alice", 5).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("429"), "got: {message}");
        assert!(message.contains("Too Many Requests"), "got: {message}");
    }

    #[tokio::test]
    async fn tweets_decode_and_forward_count() {
        #[derive(Debug, serde::Deserialize)]
        struct Params {
            count: usize,
        }
        let app = axum::Router::new().route(
            "/i/api/users/{name}/tweets",
            axum::routing::get(|Query(params): Query<Params>| async move {
                let tweets: Vec<serde_json::Value> = (0..params.count)
                    .map(|i| serde_json::json!({"id": i.to_string(), "username": "alice", "text": "hi"}))
                    .collect();
                Json(tweets)
            }),
        );
        let base = start_mock(app).await;

        let client = HttpUpstreamClient::new(&base, None).unwrap();
        let tweets = client.tweets("alice", 3).await.unwrap();
        assert_eq!(tweets.len(), 3);
        assert_eq!(tweets[0].username, "alice");
    }

    #[tokio::test]
    async fn login_adopts_set_cookie_session() {
        let app = axum::Router::new().route(
            "/i/api/login",
            axum::routing::post(|| async {
                axum::http::Response::builder()
                    .status(StatusCode::OK)
                    .header("set-cookie", "auth_token=fresh; Path=/; Secure; HttpOnly")
                    .header("set-cookie", "ct0=freshcsrf; Path=/; Secure")
                    .body(axum::body::Body::from("{}"))
                    .unwrap()
            }),
        );
        let base = start_mock(app).await;

        let client = HttpUpstreamClient::new(&base, None).unwrap();
        client
            .login(&LoginCredentials {
                username: "alice".into(),
                password: "pw".into(),
                email: "a@b.com".into(),
                totp_secret: None,
            })
            .await
            .unwrap();

        let cookies = client.cookies().await;
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("auth_token=fresh"));
    }

    #[tokio::test]
    async fn failed_login_is_an_auth_error() {
        let app = axum::Router::new().route(
            "/i/api/login",
            axum::routing::post(|| async { (StatusCode::FORBIDDEN, "bad credentials") }),
        );
        let base = start_mock(app).await;

        let client = HttpUpstreamClient::new(&base, None).unwrap();
        let err = client
            .login(&LoginCredentials {
                username: "alice".into(),
                password: "wrong".into(),
                email: "a@b.com".into(),
                totp_secret: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_network_error() {
        let client = HttpUpstreamClient::new("http://127.0.0.1:1", None).unwrap();
        let err = client.user_id("support").await.unwrap_err();
        assert!(matches!(err, Error::Network(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn cookie_header_strips_attributes() {
        let client = HttpUpstreamClient::new("http://unused", None).unwrap();
        client
            .set_cookies(&[
                "ct0=a; Domain=.x.com; Path=/; Secure".to_string(),
                "auth_token=b; Path=/; HttpOnly".to_string(),
            ])
            .await;
        assert_eq!(client.cookie_header().await, "ct0=a; auth_token=b");
        assert_eq!(client.csrf_token().await.as_deref(), Some("a"));
    }

    #[test]
    fn invalid_proxy_url_is_rejected() {
        let proxy = Proxy {
            url: "not a url".into(),
            host: "bad".into(),
            port: 0,
        };
        assert!(HttpUpstreamClient::new("http://unused", Some(&proxy)).is_err());
    }
}
