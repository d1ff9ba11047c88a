//! Scraping gateway service
//!
//! Single-binary service that multiplexes read-only scraping requests across
//! a pool of upstream accounts and HTTP proxies:
//! 1. loads the accounts/proxies flat files and the cookie cache
//! 2. starts the dispatcher (scheduler loop + health sweep)
//! 3. serves the REST surface under /api/v3

mod config;
mod metrics;
mod routes;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dispatch::Dispatcher;
use stores::{AccountStore, CookieCache, ProxyStore};
use upstream::AuthFactory;

use crate::config::Config;
use crate::routes::{AppState, build_router};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting scrape gateway");

    // Install the Prometheus recorder before any metrics are emitted
    let prometheus = metrics::install_recorder();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        listen_addr = %config.listen_addr,
        upstream = %config.upstream_base_url,
        max_concurrency = config.dispatch.max_concurrency,
        queue_capacity = config.dispatch.max_queue_size,
        "configuration loaded"
    );

    let accounts = Arc::new(
        AccountStore::load(&config.accounts_path)
            .await
            .with_context(|| format!("loading accounts from {}", config.accounts_path.display()))?,
    );
    // Proxies are optional: without them every request goes direct.
    let proxies = Arc::new(match ProxyStore::load(&config.proxies_path).await {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!(
                path = %config.proxies_path.display(),
                error = %e,
                "proxies unavailable, all traffic goes direct"
            );
            ProxyStore::empty()
        }
    });
    let cookie_cache = Arc::new(
        CookieCache::load(config.cookies_path.clone())
            .await
            .with_context(|| format!("loading cookie cache from {}", config.cookies_path.display()))?,
    );

    if accounts.is_empty().await {
        tracing::warn!("account roster is empty; every dispatch will fail until reload");
    }

    let factory = Arc::new(
        AuthFactory::new(
            &config.upstream_base_url,
            cookie_cache,
            &config.verify_screen_name,
            config.login_timeout_ms(),
        )
        .context("building client factory")?,
    );

    let dispatcher = Dispatcher::new(config.dispatch.clone(), accounts, proxies, factory);
    dispatcher.start().await;

    let state = AppState {
        dispatcher: dispatcher.clone(),
        prometheus,
        started_at: Instant::now(),
    };
    let app = build_router(state);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "accepting requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    dispatcher.stop().await;
    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
