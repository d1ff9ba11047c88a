//! REST surface for the gateway
//!
//! All API routes live under `/api/v3` and return the envelope
//! `{success, message, data, errors}`. Counts are clamped per route before
//! dispatch, and dispatch failures map to external statuses through the
//! classifier. `/metrics` sits at the server root, outside the API prefix,
//! so scrapes never contend with the dispatch queue.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tracing::debug;

use dispatch::{Dispatcher, Error as DispatchError, Priority};
use stores::Account;
use upstream::{BoxFuture, SearchMode, UpstreamClient};

use crate::metrics;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

/// The response envelope every API route returns.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    pub errors: Vec<String>,
}

/// Build the axum router with all routes and shared state.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/tweets/{username}", get(user_tweets))
        .route("/tweets/{username}/latest", get(latest_tweet))
        .route("/tweets/{username}/replies", get(user_replies))
        .route("/search", get(search))
        .route("/profile/{username}", get(profile))
        .route("/followers/{username}", get(followers))
        .route("/following/{username}", get(following))
        .route("/tweet/{id}", get(tweet_by_id));

    Router::new()
        .nest("/api/v3", api)
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CountQuery {
    count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
    count: Option<usize>,
    mode: Option<String>,
}

/// Clamp a requested count into `[1, max]`, falling back to the route default.
fn clamp_count(requested: Option<usize>, default: usize, max: usize) -> usize {
    requested.unwrap_or(default).clamp(1, max)
}

fn ok_envelope<T: Serialize>(message: &str, data: T) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            success: true,
            message: message.to_string(),
            data: Some(data),
            errors: Vec::new(),
        }),
    )
        .into_response()
}

fn error_envelope(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(Envelope::<()> {
            success: false,
            message: message.clone(),
            data: None,
            errors: vec![message],
        }),
    )
        .into_response()
}

/// Label for the dispatch-failure metric.
fn failure_label(err: &DispatchError) -> &'static str {
    match err {
        DispatchError::Upstream { kind, .. } => kind.label(),
        DispatchError::QueueFull => "queue_full",
        DispatchError::NoAccounts => "no_accounts",
        DispatchError::Shutdown => "shutdown",
        DispatchError::Reload(_) => "reload",
    }
}

/// Dispatch an operation and wrap its outcome in the envelope.
async fn run<T, F>(
    state: &AppState,
    route: &'static str,
    op: String,
    message: &'static str,
    thunk: F,
) -> Response
where
    T: Serialize + Send + 'static,
    F: Fn(Arc<dyn UpstreamClient>, Account) -> BoxFuture<'static, upstream::Result<T>>
        + Send
        + Sync
        + 'static,
{
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let started = Instant::now();
    debug!(request_id = %request_id, op = %op, "dispatching api request");

    match state.dispatcher.execute(&op, Priority::Medium, thunk).await {
        Ok(data) => {
            metrics::record_api_request(route, 200, started.elapsed().as_secs_f64());
            ok_envelope(message, data)
        }
        Err(err) => {
            let status = err.external_status();
            metrics::record_dispatch_failure(failure_label(&err));
            metrics::record_api_request(route, status, started.elapsed().as_secs_f64());
            let status =
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            error_envelope(status, err.to_string())
        }
    }
}

/// GET /api/v3/health — service liveness plus a pool summary.
async fn health(State(state): State<AppState>) -> Response {
    let stats = state.dispatcher.stats().await;
    let usable = stats.accounts.healthy + stats.accounts.probation;
    let status = if stats.accounts.total == 0 || usable == 0 {
        "unhealthy"
    } else if usable == stats.accounts.total {
        "healthy"
    } else {
        "degraded"
    };
    ok_envelope(
        "gateway health",
        serde_json::json!({
            "status": status,
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "accounts_total": stats.accounts.total,
            "accounts_usable": usable,
        }),
    )
}

/// GET /api/v3/stats — full dispatcher snapshot.
async fn stats(State(state): State<AppState>) -> Response {
    let stats = state.dispatcher.stats().await;
    ok_envelope("dispatcher stats", stats)
}

/// GET /api/v3/tweets/{username}?count= — recent tweets, count 1-100, default 5.
async fn user_tweets(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<CountQuery>,
) -> Response {
    let count = clamp_count(query.count, 5, 100);
    let op = format!("getTweets({username})");
    run(&state, "tweets", op, "tweets fetched", move |client, _account| {
        let username = username.clone();
        Box::pin(async move { client.tweets(&username, count).await })
    })
    .await
}

/// GET /api/v3/tweets/{username}/latest — the single most recent tweet.
async fn latest_tweet(State(state): State<AppState>, Path(username): Path<String>) -> Response {
    let op = format!("getLatestTweet({username})");
    run(
        &state,
        "latest_tweet",
        op,
        "latest tweet fetched",
        move |client, _account| {
            let username = username.clone();
            Box::pin(async move { client.latest_tweet(&username).await })
        },
    )
    .await
}

/// GET /api/v3/tweets/{username}/replies?count= — tweets and replies.
async fn user_replies(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<CountQuery>,
) -> Response {
    let count = clamp_count(query.count, 5, 100);
    let op = format!("getTweetsAndReplies({username})");
    run(&state, "replies", op, "replies fetched", move |client, _account| {
        let username = username.clone();
        Box::pin(async move { client.tweets_and_replies(&username, count).await })
    })
    .await
}

/// GET /api/v3/search?q=&count=&mode= — search, count 1-100, default 20.
async fn search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
    let Some(q) = query.q.filter(|q| !q.trim().is_empty()) else {
        return error_envelope(
            StatusCode::BAD_REQUEST,
            "Missing required query parameter: q".to_string(),
        );
    };
    let mode = match query.mode.as_deref() {
        None => SearchMode::Latest,
        Some(raw) => match SearchMode::parse(raw) {
            Some(mode) => mode,
            None => {
                return error_envelope(
                    StatusCode::BAD_REQUEST,
                    format!("mode must be latest or top, got: {raw}"),
                );
            }
        },
    };
    let count = clamp_count(query.count, 20, 100);
    let op = format!("searchTweets({q})");
    run(&state, "search", op, "search complete", move |client, _account| {
        let q = q.clone();
        Box::pin(async move { client.search(&q, count, mode).await })
    })
    .await
}

/// GET /api/v3/profile/{username} — profile lookup.
async fn profile(State(state): State<AppState>, Path(username): Path<String>) -> Response {
    let op = format!("getProfile({username})");
    run(&state, "profile", op, "profile fetched", move |client, _account| {
        let username = username.clone();
        Box::pin(async move { client.profile(&username).await })
    })
    .await
}

/// GET /api/v3/followers/{username}?count= — followers, count 1-200, default 50.
async fn followers(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<CountQuery>,
) -> Response {
    let count = clamp_count(query.count, 50, 200);
    let op = format!("getFollowers({username})");
    run(&state, "followers", op, "followers fetched", move |client, _account| {
        let username = username.clone();
        Box::pin(async move { client.followers(&username, count).await })
    })
    .await
}

/// GET /api/v3/following/{username}?count= — following, count 1-200, default 50.
async fn following(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<CountQuery>,
) -> Response {
    let count = clamp_count(query.count, 50, 200);
    let op = format!("getFollowing({username})");
    run(&state, "following", op, "following fetched", move |client, _account| {
        let username = username.clone();
        Box::pin(async move { client.following(&username, count).await })
    })
    .await
}

/// GET /api/v3/tweet/{id} — one tweet by id.
async fn tweet_by_id(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let op = format!("getTweetById({id})");
    run(&state, "tweet", op, "tweet fetched", move |client, _account| {
        let id = id.clone();
        Box::pin(async move { client.tweet(&id).await })
    })
    .await
}

/// GET /metrics — Prometheus text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use dispatch::DispatchConfig;
    use std::sync::Mutex as StdMutex;
    use stores::{AccountStore, Proxy, ProxyStore};
    use tower::ServiceExt;
    use upstream::{ClientFactory, LoginCredentials, Profile, Tweet, UserSummary};

    /// Canned client: records the last requested count, optionally fails
    /// profile lookups with a 404-shaped error.
    #[derive(Debug)]
    struct TestClient {
        last_count: StdMutex<Option<usize>>,
        profile_not_found: bool,
    }

    impl TestClient {
        fn new(profile_not_found: bool) -> Self {
            Self {
                last_count: StdMutex::new(None),
                profile_not_found,
            }
        }

        fn note_count(&self, count: usize) {
            *self.last_count.lock().unwrap() = Some(count);
        }

        fn tweet(id: &str) -> Tweet {
            Tweet {
                id: id.to_string(),
                username: "alice".into(),
                text: "hello".into(),
                created_at: None,
                likes: 1,
                retweets: 0,
                is_reply: false,
            }
        }
    }

    impl UpstreamClient for TestClient {
        fn set_cookies<'a>(&'a self, _: &'a [String]) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }

        fn cookies(&self) -> BoxFuture<'_, Vec<String>> {
            Box::pin(async { Vec::new() })
        }

        fn login<'a>(&'a self, _: &'a LoginCredentials) -> BoxFuture<'a, upstream::Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn user_id<'a>(&'a self, _: &'a str) -> BoxFuture<'a, upstream::Result<Option<String>>> {
            Box::pin(async { Ok(Some("1".into())) })
        }

        fn tweets<'a>(
            &'a self,
            _: &'a str,
            count: usize,
        ) -> BoxFuture<'a, upstream::Result<Vec<Tweet>>> {
            Box::pin(async move {
                self.note_count(count);
                Ok(vec![Self::tweet("1"), Self::tweet("2")])
            })
        }

        fn latest_tweet<'a>(&'a self, _: &'a str) -> BoxFuture<'a, upstream::Result<Option<Tweet>>> {
            Box::pin(async { Ok(Some(Self::tweet("9"))) })
        }

        fn tweets_and_replies<'a>(
            &'a self,
            _: &'a str,
            count: usize,
        ) -> BoxFuture<'a, upstream::Result<Vec<Tweet>>> {
            Box::pin(async move {
                self.note_count(count);
                Ok(vec![Self::tweet("3")])
            })
        }

        fn search<'a>(
            &'a self,
            _: &'a str,
            count: usize,
            _: SearchMode,
        ) -> BoxFuture<'a, upstream::Result<Vec<Tweet>>> {
            Box::pin(async move {
                self.note_count(count);
                Ok(vec![Self::tweet("4")])
            })
        }

        fn profile<'a>(&'a self, screen_name: &'a str) -> BoxFuture<'a, upstream::Result<Profile>> {
            let username = screen_name.to_string();
            let not_found = self.profile_not_found;
            Box::pin(async move {
                if not_found {
                    Err(upstream::Error::Status {
                        status: 404,
                        body: "User not found".into(),
                    })
                } else {
                    Ok(Profile {
                        username,
                        display_name: Some("Alice".into()),
                        bio: None,
                        followers: 10,
                        following: 5,
                        tweets: 100,
                    })
                }
            })
        }

        fn followers<'a>(
            &'a self,
            _: &'a str,
            count: usize,
        ) -> BoxFuture<'a, upstream::Result<Vec<UserSummary>>> {
            Box::pin(async move {
                self.note_count(count);
                Ok(vec![UserSummary {
                    username: "bob".into(),
                    display_name: None,
                }])
            })
        }

        fn following<'a>(
            &'a self,
            _: &'a str,
            count: usize,
        ) -> BoxFuture<'a, upstream::Result<Vec<UserSummary>>> {
            Box::pin(async move {
                self.note_count(count);
                Ok(Vec::new())
            })
        }

        fn tweet<'a>(&'a self, id: &'a str) -> BoxFuture<'a, upstream::Result<Tweet>> {
            let id = id.to_string();
            Box::pin(async move { Ok(Self::tweet(&id)) })
        }
    }

    struct TestFactory {
        client: Arc<TestClient>,
    }

    impl ClientFactory for TestFactory {
        fn client<'a>(
            &'a self,
            _: &'a Account,
            _: Option<&'a Proxy>,
        ) -> BoxFuture<'a, upstream::Result<Arc<dyn UpstreamClient>>> {
            let client = self.client.clone();
            Box::pin(async move { Ok(client as Arc<dyn UpstreamClient>) })
        }
    }

    /// Create a PrometheusHandle without installing a global recorder, so
    /// parallel tests don't fight over the process-wide slot.
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    async fn test_app(
        account_lines: &str,
        profile_not_found: bool,
    ) -> (Router, Arc<TestClient>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twitters.txt");
        std::fs::write(&path, account_lines).unwrap();

        let accounts = Arc::new(AccountStore::load(&path).await.unwrap());
        let proxies = Arc::new(ProxyStore::empty());
        let client = Arc::new(TestClient::new(profile_not_found));
        let factory = Arc::new(TestFactory {
            client: client.clone(),
        });
        let dispatcher = Dispatcher::new(
            DispatchConfig {
                max_queue_size: 64,
                ..DispatchConfig::default()
            },
            accounts,
            proxies,
            factory,
        );
        dispatcher.start().await;

        let state = AppState {
            dispatcher,
            prometheus: test_prometheus_handle(),
            started_at: Instant::now(),
        };
        (build_router(state), client, dir)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn tweets_route_returns_wrapped_data() {
        let (app, _client, _dir) = test_app("alice:pw:a@b.com::::\n", false).await;
        let (status, json) = get_json(app, "/api/v3/tweets/alice").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"].as_array().unwrap().len(), 2);
        assert_eq!(json["errors"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn tweets_count_defaults_to_five() {
        let (app, client, _dir) = test_app("alice:pw:a@b.com::::\n", false).await;
        let (status, _) = get_json(app, "/api/v3/tweets/alice").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(*client.last_count.lock().unwrap(), Some(5));
    }

    #[tokio::test]
    async fn tweets_count_clamps_to_one_hundred() {
        let (app, client, _dir) = test_app("alice:pw:a@b.com::::\n", false).await;
        let (status, _) = get_json(app, "/api/v3/tweets/alice?count=500").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(*client.last_count.lock().unwrap(), Some(100));
    }

    #[tokio::test]
    async fn zero_count_clamps_up_to_one() {
        let (app, client, _dir) = test_app("alice:pw:a@b.com::::\n", false).await;
        let (status, _) = get_json(app, "/api/v3/tweets/alice?count=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(*client.last_count.lock().unwrap(), Some(1));
    }

    #[tokio::test]
    async fn followers_clamp_to_two_hundred() {
        let (app, client, _dir) = test_app("alice:pw:a@b.com::::\n", false).await;
        let (status, _) = get_json(app, "/api/v3/followers/alice?count=900").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(*client.last_count.lock().unwrap(), Some(200));
    }

    #[tokio::test]
    async fn search_requires_q() {
        let (app, _client, _dir) = test_app("alice:pw:a@b.com::::\n", false).await;
        let (status, json) = get_json(app, "/api/v3/search").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert!(
            json["message"].as_str().unwrap().contains("q"),
            "message should name the missing parameter: {json}"
        );
    }

    #[tokio::test]
    async fn search_rejects_unknown_mode() {
        let (app, _client, _dir) = test_app("alice:pw:a@b.com::::\n", false).await;
        let (status, json) = get_json(app, "/api/v3/search?q=rust&mode=hot").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn search_defaults_to_twenty_latest() {
        let (app, client, _dir) = test_app("alice:pw:a@b.com::::\n", false).await;
        let (status, json) = get_json(app, "/api/v3/search?q=rust").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(*client.last_count.lock().unwrap(), Some(20));
    }

    #[tokio::test]
    async fn profile_not_found_maps_to_404_envelope() {
        let (app, _client, _dir) = test_app("alice:pw:a@b.com::::\n", true).await;
        let (status, json) = get_json(app, "/api/v3/profile/ghost").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);
        assert!(json["data"].is_null());
        assert_eq!(json["errors"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_roster_maps_to_503() {
        let (app, _client, _dir) = test_app("", false).await;
        let (status, json) = get_json(app, "/api/v3/tweets/alice").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["message"], "No usable accounts available");
    }

    #[tokio::test]
    async fn latest_tweet_route_returns_single_tweet() {
        let (app, _client, _dir) = test_app("alice:pw:a@b.com::::\n", false).await;
        let (status, json) = get_json(app, "/api/v3/tweets/alice/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["id"], "9");
    }

    #[tokio::test]
    async fn tweet_by_id_route_echoes_id() {
        let (app, _client, _dir) = test_app("alice:pw:a@b.com::::\n", false).await;
        let (status, json) = get_json(app, "/api/v3/tweet/777").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["id"], "777");
    }

    #[tokio::test]
    async fn stats_route_reports_configured_queue_capacity() {
        let (app, _client, _dir) = test_app("alice:pw:a@b.com::::\n", false).await;
        let (status, json) = get_json(app, "/api/v3/stats").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["queue"]["max_size"], 64);
        assert_eq!(json["data"]["accounts"]["total"], 1);
        assert_eq!(json["data"]["concurrency"]["max"], 10);
        assert!(json["data"]["per_account"]["alice"]["status"].is_string());
    }

    #[tokio::test]
    async fn health_route_reports_pool_state() {
        let (app, _client, _dir) = test_app("alice:pw:a@b.com::::\n", false).await;
        let (status, json) = get_json(app, "/api/v3/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["status"], "healthy");
        assert_eq!(json["data"]["accounts_total"], 1);
    }

    #[tokio::test]
    async fn health_route_is_unhealthy_with_no_accounts() {
        let (app, _client, _dir) = test_app("", false).await;
        let (_, json) = get_json(app, "/api/v3/health").await;
        assert_eq!(json["data"]["status"], "unhealthy");
    }

    #[tokio::test]
    async fn metrics_route_returns_prometheus_text() {
        let (app, _client, _dir) = test_app("alice:pw:a@b.com::::\n", false).await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
