//! Account health bookkeeping and selection
//!
//! Per-account records keyed by username; the account list itself lives in
//! the store, so a record whose account disappears on reload is simply
//! orphaned. All mutation goes through the registry to keep the invariants
//! local:
//!
//! - Healthy → Locked (account-locked failure, terminal until reload)
//! - Healthy → Cooldown (rate limit, or too many consecutive failures)
//! - Cooldown → Probation (sweep, after the cooldown deadline passes)
//! - Probation → Healthy (three consecutive successes)
//! - Disabled/Locked → only `reset` (operator reload) recovers
//!
//! Every attempt — success or failure — lands in the sliding rate window, so
//! accounts stop being selectable once they have burned their per-window
//! budget regardless of outcome.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::classify::ErrorKind;
use stores::Account;

/// Runtime status of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Healthy,
    Probation,
    Cooldown { until: Instant },
    Disabled,
    Locked,
}

impl AccountStatus {
    /// Status label for stats and logging.
    pub fn label(&self) -> &'static str {
        match self {
            AccountStatus::Healthy => "healthy",
            AccountStatus::Probation => "probation",
            AccountStatus::Cooldown { .. } => "cooldown",
            AccountStatus::Disabled => "disabled",
            AccountStatus::Locked => "locked",
        }
    }
}

/// Mutable per-account record. Owned by the registry; callers get clones.
#[derive(Debug, Clone)]
pub struct AccountHealth {
    pub status: AccountStatus,
    pub last_used: Option<Instant>,
    pub request_count: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_error: Option<(ErrorKind, Instant)>,
    /// Exponentially-weighted moving average in [0, 1].
    pub success_rate: f64,
    /// Attempt instants inside the rate window, oldest first.
    recent: VecDeque<Instant>,
}

impl AccountHealth {
    fn new() -> Self {
        Self {
            status: AccountStatus::Healthy,
            last_used: None,
            request_count: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_error: None,
            success_rate: 1.0,
            recent: VecDeque::new(),
        }
    }

    fn record_attempt(&mut self, now: Instant) {
        self.last_used = Some(now);
        self.request_count += 1;
        self.recent.push_back(now);
    }

    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some(front) = self.recent.front() {
            if now.duration_since(*front) > window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    /// Attempts inside `[now - window, now]`. The authoritative count for
    /// rate-limit admission; entries older than the window are ignored even
    /// before the sweep prunes them.
    pub fn window_len(&self, window: Duration, now: Instant) -> usize {
        self.recent
            .iter()
            .filter(|t| now.duration_since(**t) <= window)
            .count()
    }
}

/// Tunables for the state machine and selection policy.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// How long a rate-limited account sits out.
    pub cooldown: Duration,
    /// Consecutive failures that force a cooldown.
    pub max_consecutive_failures: u32,
    /// Sliding window over which attempts are counted.
    pub rate_window: Duration,
    /// Attempts allowed per account inside the window.
    pub max_requests_per_window: usize,
    /// How often the background sweep runs.
    pub sweep_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(120),
            max_consecutive_failures: 10,
            rate_window: Duration::from_secs(900),
            max_requests_per_window: 50,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Registry of per-account health records.
pub struct HealthRegistry {
    config: HealthConfig,
    entries: RwLock<HashMap<String, AccountHealth>>,
}

impl HealthRegistry {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Create the record for `username` if it doesn't exist yet.
    pub async fn ensure(&self, username: &str) {
        let mut entries = self.entries.write().await;
        entries
            .entry(username.to_string())
            .or_insert_with(AccountHealth::new);
    }

    /// Record a successful attempt.
    pub async fn record_success(&self, username: &str) {
        let mut entries = self.entries.write().await;
        let health = entries
            .entry(username.to_string())
            .or_insert_with(AccountHealth::new);
        let now = Instant::now();
        health.record_attempt(now);
        health.consecutive_successes += 1;
        health.consecutive_failures = 0;
        health.success_rate = health.success_rate * 0.9 + 0.1;

        if health.status == AccountStatus::Probation && health.consecutive_successes >= 3 {
            info!(account = username, "probation cleared, account healthy");
            health.status = AccountStatus::Healthy;
        }
    }

    /// Record a failed attempt and apply status transitions for its kind.
    pub async fn record_failure(&self, username: &str, kind: ErrorKind) {
        let mut entries = self.entries.write().await;
        let health = entries
            .entry(username.to_string())
            .or_insert_with(AccountHealth::new);
        let now = Instant::now();
        health.record_attempt(now);
        health.consecutive_failures += 1;
        health.consecutive_successes = 0;
        health.success_rate *= 0.9;
        health.last_error = Some((kind, now));

        match health.status {
            // Terminal until reload; counters still move above.
            AccountStatus::Locked | AccountStatus::Disabled => {}
            _ => match kind {
                ErrorKind::AccountLocked => {
                    warn!(account = username, "account locked by upstream");
                    health.status = AccountStatus::Locked;
                }
                ErrorKind::RateLimit => {
                    let until = now + self.config.cooldown;
                    info!(
                        account = username,
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "account entering cooldown (rate limited)"
                    );
                    health.status = AccountStatus::Cooldown { until };
                }
                // Auth and NotFound bump counters only; status never moves,
                // not even past the consecutive-failure threshold.
                ErrorKind::Auth | ErrorKind::NotFound => {}
                _ if health.consecutive_failures >= self.config.max_consecutive_failures => {
                    let until = now + self.config.cooldown;
                    warn!(
                        account = username,
                        failures = health.consecutive_failures,
                        "account entering cooldown (consecutive failures)"
                    );
                    health.status = AccountStatus::Cooldown { until };
                }
                _ => {}
            },
        }
    }

    /// One sweep pass: release expired cooldowns into probation and prune the
    /// rate windows.
    pub async fn sweep(&self) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        for (username, health) in entries.iter_mut() {
            if let AccountStatus::Cooldown { until } = health.status {
                if now > until {
                    info!(account = %username, "cooldown expired, entering probation");
                    health.status = AccountStatus::Probation;
                    health.consecutive_failures = 0;
                }
            }
            health.prune(self.config.rate_window, now);
        }
    }

    /// Pick the best eligible account, or `None` when every account is
    /// excluded.
    ///
    /// Eligibility: not Disabled/Locked, not inside an active cooldown, and
    /// under the per-window attempt budget. Preference order: Healthy first,
    /// then fewest consecutive failures, then least recently used.
    pub async fn select(&self, accounts: &[Account]) -> Option<Account> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        // (index, non-healthy, consecutive failures, last used) per candidate;
        // sort keys are copied out so the map borrow ends before the sort.
        let mut candidates: Vec<(usize, bool, u32, Option<Instant>)> = Vec::new();
        for (idx, account) in accounts.iter().enumerate() {
            let health = entries
                .entry(account.username.clone())
                .or_insert_with(AccountHealth::new);
            let eligible = match health.status {
                AccountStatus::Disabled | AccountStatus::Locked => false,
                AccountStatus::Cooldown { until } => now >= until,
                AccountStatus::Healthy | AccountStatus::Probation => true,
            };
            if !eligible {
                continue;
            }
            if health.window_len(self.config.rate_window, now) >= self.config.max_requests_per_window
            {
                debug!(account = %account.username, "rate window exhausted, skipping");
                continue;
            }
            candidates.push((
                idx,
                health.status != AccountStatus::Healthy,
                health.consecutive_failures,
                health.last_used,
            ));
        }

        candidates.sort_by_key(|(_, non_healthy, failures, last_used)| {
            (*non_healthy, *failures, *last_used)
        });
        candidates.first().map(|(idx, ..)| accounts[*idx].clone())
    }

    /// Clone of one record, mainly for stats and tests.
    pub async fn get(&self, username: &str) -> Option<AccountHealth> {
        self.entries.read().await.get(username).cloned()
    }

    /// Snapshot of all records.
    pub async fn snapshot(&self) -> HashMap<String, AccountHealth> {
        self.entries.read().await.clone()
    }

    /// Drop every record. Used on account reload: the fresh roster starts
    /// healthy, which is the only way out of Locked and Disabled.
    pub async fn reset(&self) {
        self.entries.write().await.clear();
    }
}

/// Spawn the periodic sweep. Runs until aborted.
pub fn spawn_sweep_task(registry: Arc<HealthRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(registry.config().sweep_interval);
        // Skip the immediate first tick — records were just initialised.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            registry.sweep().await;
        }
    })
}
