//! Environment-driven configuration
//!
//! Every knob is an environment variable with a default, validated fail-fast
//! at startup so a typo'd limit or a zero timeout never reaches the
//! dispatcher. Full URL parsing happens where the client factory is built;
//! here we only reject schemes that could never work.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use common::{Error, Result};
use dispatch::{DispatchConfig, HealthConfig, TimeoutConfig};

/// Resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub upstream_base_url: String,
    pub verify_screen_name: String,
    pub accounts_path: PathBuf,
    pub proxies_path: PathBuf,
    pub cookies_path: PathBuf,
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Read and validate configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let listen_addr = parse_var("LISTEN_ADDR", "0.0.0.0:3000")?;
        let upstream_base_url =
            std::env::var("UPSTREAM_BASE_URL").unwrap_or_else(|_| "https://x.com".to_string());
        let verify_screen_name =
            std::env::var("VERIFY_SCREEN_NAME").unwrap_or_else(|_| "support".to_string());

        if !upstream_base_url.starts_with("http://") && !upstream_base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "UPSTREAM_BASE_URL must use http or https scheme, got: {upstream_base_url}"
            )));
        }

        let max_concurrency: usize = parse_var("MAX_CONCURRENCY", "10")?;
        let max_queue_size: usize = parse_var("MAX_QUEUE_SIZE", "1000")?;
        let max_retries: u32 = parse_var("MAX_RETRIES", "3")?;
        let timeouts = TimeoutConfig {
            login_ms: parse_var("TIMEOUT_LOGIN", "45000")?,
            search_ms: parse_var("TIMEOUT_SEARCH", "60000")?,
            profile_ms: parse_var("TIMEOUT_PROFILE", "30000")?,
            tweet_ms: parse_var("TIMEOUT_TWEET", "35000")?,
            default_ms: parse_var("TIMEOUT_DEFAULT", "30000")?,
        };

        if max_concurrency == 0 {
            return Err(Error::Config("MAX_CONCURRENCY must be greater than 0".into()));
        }
        if max_queue_size == 0 {
            return Err(Error::Config("MAX_QUEUE_SIZE must be greater than 0".into()));
        }
        if max_retries == 0 {
            return Err(Error::Config("MAX_RETRIES must be greater than 0".into()));
        }
        for (name, value) in [
            ("TIMEOUT_LOGIN", timeouts.login_ms),
            ("TIMEOUT_SEARCH", timeouts.search_ms),
            ("TIMEOUT_PROFILE", timeouts.profile_ms),
            ("TIMEOUT_TWEET", timeouts.tweet_ms),
            ("TIMEOUT_DEFAULT", timeouts.default_ms),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than 0")));
            }
        }

        Ok(Self {
            listen_addr,
            upstream_base_url,
            verify_screen_name,
            accounts_path: path_var("ACCOUNTS_TXT_PATH", "twitters.txt"),
            proxies_path: path_var("PROXIES_TXT_PATH", "proxies.txt"),
            cookies_path: path_var("COOKIES_JSON_PATH", "cookies.json"),
            dispatch: DispatchConfig {
                max_concurrency,
                max_queue_size,
                max_retries,
                timeouts,
                health: HealthConfig::default(),
            },
        })
    }

    /// The login-class deadline, shared with the auth ladder's factory.
    pub fn login_timeout_ms(&self) -> u64 {
        self.dispatch.timeouts.login_ms
    }
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| Error::Config(format!("{name} is not valid: {e}")))
}

fn path_var(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}
