//! The dispatcher: admission, scheduling, selection, retry
//!
//! `execute` admits a typed operation into the bounded priority queue and
//! returns once the scheduler has run it to completion. The scheduler loop
//! pops queued work whenever a concurrency slot is free (woken by a Notify,
//! with a 100 ms tick as a backstop) and reserves the slot for the whole
//! dispatch, so `0 <= active <= max_concurrency` holds through
//! authentication as well as the user operation.
//!
//! Each dispatch attempt binds a freshly-selected account to a
//! freshly-picked proxy; retryable failures re-enter selection with
//! exponential backoff plus jitter, so a retry is free to land on a
//! different account and proxy.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, oneshot};
use tracing::{debug, info, warn};

use crate::classify::{self, ErrorKind};
use crate::error::{Error, Result};
use crate::health::{AccountStatus, HealthConfig, HealthRegistry, spawn_sweep_task};
use crate::queue::{Priority, PriorityQueue};
use stores::{AccountStore, ProxyStore};
use upstream::{BoxFuture, ClientFactory, UpstreamClient};

/// Per-operation-class deadlines in milliseconds.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub login_ms: u64,
    pub search_ms: u64,
    pub profile_ms: u64,
    pub tweet_ms: u64,
    pub default_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            login_ms: 45_000,
            search_ms: 60_000,
            profile_ms: 30_000,
            tweet_ms: 35_000,
            default_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    /// Deadline for an operation, classed by its name.
    pub fn for_op(&self, op: &str) -> u64 {
        let op = op.to_lowercase();
        if op.contains("login") {
            self.login_ms
        } else if op.contains("search") {
            self.search_ms
        } else if op.contains("profile") {
            self.profile_ms
        } else if op.contains("tweet") {
            self.tweet_ms
        } else {
            self.default_ms
        }
    }
}

/// Dispatcher tunables.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_concurrency: usize,
    pub max_queue_size: usize,
    pub max_retries: u32,
    pub timeouts: TimeoutConfig,
    pub health: HealthConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            max_queue_size: 1_000,
            max_retries: 3,
            timeouts: TimeoutConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

/// Type-erased queued work: invoking the closure yields the future that runs
/// the retry loop and fulfils the caller's oneshot.
type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

struct QueuedJob {
    op: String,
    enqueued_at: Instant,
    job: Job,
}

/// Snapshot returned by [`Dispatcher::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub accounts: AccountCounts,
    pub proxies: ProxyCounts,
    pub queue: QueueCounts,
    pub concurrency: ConcurrencyCounts,
    pub per_account: BTreeMap<String, PerAccountStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountCounts {
    pub total: usize,
    pub healthy: usize,
    pub probation: usize,
    pub cooldown: usize,
    pub disabled: usize,
    pub locked: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyCounts {
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueCounts {
    pub depth: usize,
    /// The configured capacity, not a constant.
    pub max_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConcurrencyCounts {
    pub active: usize,
    pub max: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerAccountStats {
    pub status: String,
    pub requests: u64,
    pub success_rate_pct: f64,
}

struct Inner {
    config: DispatchConfig,
    accounts: Arc<AccountStore>,
    proxies: Arc<ProxyStore>,
    factory: Arc<dyn ClientFactory>,
    health: Arc<HealthRegistry>,
    queue: Mutex<PriorityQueue<QueuedJob>>,
    notify: Notify,
    active: AtomicUsize,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// Releases a concurrency slot on every exit path, panics included.
struct SlotGuard {
    inner: Arc<Inner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::AcqRel);
        self.inner.notify.notify_one();
    }
}

/// The request dispatcher. Cheap to clone; all clones share one queue,
/// health registry, and concurrency budget.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        accounts: Arc<AccountStore>,
        proxies: Arc<ProxyStore>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        let health = Arc::new(HealthRegistry::new(config.health.clone()));
        let queue = Mutex::new(PriorityQueue::new(config.max_queue_size));
        Self {
            inner: Arc::new(Inner {
                config,
                accounts,
                proxies,
                factory,
                health,
                queue,
                notify: Notify::new(),
                active: AtomicUsize::new(0),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Initialise health records for the loaded roster and start the
    /// scheduler and sweep tasks. Idempotent.
    pub async fn start(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        let roster = self.inner.accounts.list().await;
        for account in &roster {
            self.inner.health.ensure(&account.username).await;
        }
        tasks.push(tokio::spawn(scheduler_loop(self.inner.clone())));
        tasks.push(spawn_sweep_task(self.inner.health.clone()));
        info!(
            accounts = roster.len(),
            max_concurrency = self.inner.config.max_concurrency,
            queue_capacity = self.inner.config.max_queue_size,
            "dispatcher started"
        );
    }

    /// Stop the scheduler and sweep, dropping queued work. Callers still
    /// waiting observe a shutdown error.
    pub async fn stop(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        let mut queue = self.inner.queue.lock().await;
        while queue.pop().is_some() {}
        info!("dispatcher stopped");
    }

    /// Re-read the accounts file and reset all health records. The only way
    /// a Locked or Disabled account returns to rotation.
    pub async fn reload(&self) -> Result<usize> {
        let count = self
            .inner
            .accounts
            .reload()
            .await
            .map_err(|e| Error::Reload(e.to_string()))?;
        self.inner.health.reset().await;
        for account in self.inner.accounts.list().await {
            self.inner.health.ensure(&account.username).await;
        }
        info!(accounts = count, "accounts reloaded, health records reset");
        Ok(count)
    }

    /// Admit an operation and wait for its result.
    ///
    /// `thunk` receives an authenticated client and the account it is bound
    /// to; it may be invoked once per attempt, each time with a fresh
    /// account/proxy pairing. Admission fails fast with the queue-full error
    /// when the queue is at capacity.
    pub async fn execute<T, F>(&self, op_name: &str, priority: Priority, thunk: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn UpstreamClient>, stores::Account) -> BoxFuture<'static, upstream::Result<T>>
            + Send
            + Sync
            + 'static,
    {
        let (tx, rx) = oneshot::channel::<Result<T>>();
        let inner = self.inner.clone();
        let op = op_name.to_string();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let result = run_attempts(&inner, &op, &thunk).await;
                let _ = tx.send(result);
            })
        });

        {
            let mut queue = self.inner.queue.lock().await;
            if queue
                .push(
                    priority,
                    QueuedJob {
                        op: op_name.to_string(),
                        enqueued_at: Instant::now(),
                        job,
                    },
                )
                .is_err()
            {
                return Err(Error::QueueFull);
            }
        }
        debug!(op = op_name, priority = priority.label(), "request admitted");
        self.inner.notify.notify_one();

        rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Operational snapshot for the stats endpoint.
    pub async fn stats(&self) -> Stats {
        let roster = self.inner.accounts.list().await;
        let snapshot = self.inner.health.snapshot().await;

        let mut counts = AccountCounts {
            total: roster.len(),
            ..AccountCounts::default()
        };
        let mut per_account = BTreeMap::new();
        for account in &roster {
            let health = snapshot.get(&account.username);
            match health.map(|h| h.status) {
                None | Some(AccountStatus::Healthy) => counts.healthy += 1,
                Some(AccountStatus::Probation) => counts.probation += 1,
                Some(AccountStatus::Cooldown { .. }) => counts.cooldown += 1,
                Some(AccountStatus::Disabled) => counts.disabled += 1,
                Some(AccountStatus::Locked) => counts.locked += 1,
            }
            let (status, requests, rate) = match health {
                Some(h) => (h.status.label(), h.request_count, h.success_rate),
                None => ("healthy", 0, 1.0),
            };
            per_account.insert(
                account.username.clone(),
                PerAccountStats {
                    status: status.to_string(),
                    requests,
                    success_rate_pct: (rate * 1000.0).round() / 10.0,
                },
            );
        }

        let queue = self.inner.queue.lock().await;
        Stats {
            accounts: counts,
            proxies: ProxyCounts {
                total: self.inner.proxies.len(),
            },
            queue: QueueCounts {
                depth: queue.len(),
                max_size: queue.capacity(),
            },
            concurrency: ConcurrencyCounts {
                active: self.inner.active.load(Ordering::Acquire),
                max: self.inner.config.max_concurrency,
            },
            per_account,
        }
    }

    /// Health registry handle, for tests and diagnostics.
    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.inner.health
    }
}

/// Pop-and-spawn loop. Event-driven via the Notify, with a 100 ms tick as a
/// backstop so a missed notification can only delay work, not strand it.
async fn scheduler_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = inner.notify.notified() => {}
            _ = ticker.tick() => {}
        }
        loop {
            if inner.active.load(Ordering::Acquire) >= inner.config.max_concurrency {
                break;
            }
            let Some(queued) = inner.queue.lock().await.pop() else {
                break;
            };
            inner.active.fetch_add(1, Ordering::AcqRel);
            let guard = SlotGuard {
                inner: inner.clone(),
            };
            debug!(
                op = %queued.op,
                waited_ms = queued.enqueued_at.elapsed().as_millis() as u64,
                "request scheduled"
            );
            tokio::spawn(async move {
                let _slot = guard;
                (queued.job)().await;
            });
        }
    }
}

/// Retryable kinds: the transient set plus the two that benefit from a
/// different account (the rate-limited or locked one is already excluded
/// from the next selection).
fn retryable(kind: ErrorKind) -> bool {
    classify::is_transient(kind) || matches!(kind, ErrorKind::RateLimit | ErrorKind::AccountLocked)
}

async fn run_attempts<T, F>(inner: &Arc<Inner>, op: &str, thunk: &F) -> Result<T>
where
    T: Send + 'static,
    F: Fn(Arc<dyn UpstreamClient>, stores::Account) -> BoxFuture<'static, upstream::Result<T>>
        + Send
        + Sync,
{
    let deadline_ms = inner.config.timeouts.for_op(op);
    let max_attempts = inner.config.max_retries.max(1);
    let mut last_err = Error::NoAccounts;

    for attempt in 0..max_attempts {
        let roster = inner.accounts.list().await;
        let Some(account) = inner.health.select(&roster).await else {
            // Selection failure has its own distinct message, whether it
            // happens on the first attempt or mid-retry.
            return Err(Error::NoAccounts);
        };
        let proxy = inner.proxies.pick_random();
        debug!(
            op,
            account = %account.username,
            proxy = proxy.as_ref().map(|p| p.host.as_str()).unwrap_or("direct"),
            attempt,
            "dispatching attempt"
        );

        let failure = match inner.factory.client(&account, proxy.as_ref()).await {
            Ok(client) => {
                match common::with_timeout(thunk(client, account.clone()), deadline_ms, op).await {
                    Ok(Ok(value)) => {
                        inner.health.record_success(&account.username).await;
                        return Ok(value);
                    }
                    Ok(Err(e)) => e.to_string(),
                    Err(deadline) => deadline.to_string(),
                }
            }
            Err(e) => e.to_string(),
        };

        let kind = classify::classify(&failure);
        inner.health.record_failure(&account.username, kind).await;
        let message = classify::truncate_message(&failure);
        warn!(
            op,
            account = %account.username,
            kind = kind.label(),
            attempt,
            error = %message,
            "attempt failed"
        );

        let err = Error::Upstream { kind, message };
        if !retryable(kind) {
            return Err(err);
        }
        last_err = err;
        if attempt + 1 < max_attempts {
            let jitter: u64 = rand::thread_rng().gen_range(0..500);
            let backoff = 1_000u64 * (1u64 << attempt) + jitter;
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
    }
    Err(last_err)
}
