//! Dependency circuit breaker.
//!
//! Wraps calls to external dependencies (the identity subsystem) so a
//! degraded dependency fails fast instead of cascading latency through the
//! award path.
//!
//! State machine:
//!
//! ```text
//!   Closed ──(failures reach threshold within window)──> Open
//!   Open ──(recovery timeout elapsed, next call probes)─> HalfOpen
//!   HalfOpen ──(probe succeeds)────────────────────────> Closed
//!   HalfOpen ──(probe fails)───────────────────────────> Open
//! ```
//!
//! Failure counting is windowed: once the last recorded failure falls outside
//! the monitoring period, the count resets lazily on the next evaluation.
//!
//! State is per-process by design; replicas each track their own view of
//! dependency health. See DESIGN.md for the trade-off.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Failing fast, calls rejected without invoking the dependency
    Open,
    /// One probe call in flight decides recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Breaker tuning
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive qualifying failures within the monitoring window that trip
    /// the breaker open
    pub failure_threshold: u32,
    /// Window within which failures are counted; older failures are forgotten
    pub monitoring_window: Duration,
    /// How long the breaker stays open before the next call may probe
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            monitoring_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Point-in-time health snapshot of one breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub dependency: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u64,
    pub total_requests: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
}

/// Error returned by [`CircuitBreaker::call`]
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Breaker is open; the wrapped operation was not invoked.
    /// Carries the dependency name and stats so callers can pick a degraded
    /// path instead of surfacing a generic failure.
    Open {
        dependency: String,
        stats: BreakerStats,
    },
    /// The wrapped operation ran and failed
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerError::Open { dependency, .. } => {
                write!(f, "circuit open for dependency '{}'", dependency)
            }
            BreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
}

/// Three-state circuit breaker for one named dependency
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    total_requests: AtomicU64,
    success_count: AtomicU64,
    started: Instant,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                last_failure_at: None,
                last_success_at: None,
            }),
            total_requests: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Dependency name this breaker guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute `op` through the breaker. Every error from `op` counts as a
    /// qualifying failure; use [`call_filtered`](Self::call_filtered) when
    /// some errors should not trip the breaker.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_filtered(op, |_| true).await
    }

    /// Execute `op`; only errors for which `counts_as_failure` returns true
    /// are recorded against the breaker (the expected-error allow-list).
    pub async fn call_filtered<F, Fut, T, E>(
        &self,
        op: F,
        counts_as_failure: impl Fn(&E) -> bool,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(stats) = self.reject_if_open().await {
            return Err(BreakerError::Open {
                dependency: self.name.clone(),
                stats,
            });
        }

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match op().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(e) => {
                if counts_as_failure(&e) {
                    self.on_failure().await;
                }
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Admit or reject the next call, transitioning Open -> HalfOpen when the
    /// recovery timeout has elapsed since the last failure. Returns the
    /// current stats when the call must be rejected.
    async fn reject_if_open(&self) -> Option<BreakerStats> {
        let mut inner = self.inner.lock().await;

        if inner.state == CircuitState::Open {
            let recovered = inner
                .last_failure
                .map(|at| at.elapsed() >= self.config.recovery_timeout)
                .unwrap_or(true);
            if recovered {
                debug!(dependency = %self.name, "circuit half-open, probing recovery");
                inner.state = CircuitState::HalfOpen;
            } else {
                return Some(self.stats_locked(&inner));
            }
        }
        None
    }

    async fn on_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().await;
        inner.last_success_at = Some(Utc::now());
        if inner.state != CircuitState::Closed {
            debug!(dependency = %self.name, "circuit closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;

        // Windowed counting: forget failures once the last one ages out
        if let Some(last) = inner.last_failure {
            if last.elapsed() >= self.config.monitoring_window {
                inner.failure_count = 0;
            }
        }

        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitState::HalfOpen => {
                warn!(dependency = %self.name, "probe failed, circuit re-opened");
                inner.state = CircuitState::Open;
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                warn!(
                    dependency = %self.name,
                    failures = inner.failure_count,
                    "failure threshold reached, circuit opened"
                );
                inner.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    /// Current health snapshot
    pub async fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock().await;
        self.stats_locked(&inner)
    }

    fn stats_locked(&self, inner: &BreakerInner) -> BreakerStats {
        BreakerStats {
            dependency: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: self.success_count.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Current state (for tests and probes)
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }
}

/// Registry of breakers keyed by dependency name, for operational
/// introspection via the health routes.
pub struct BreakerManager {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerManager {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Fetch or create the breaker for a dependency
    pub fn breaker(&self, dependency: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(dependency, self.config.clone()))
            })
            .clone()
    }

    /// Health of every registered breaker
    pub async fn all_stats(&self) -> Vec<BreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(breakers.len());
        for b in breakers {
            out.push(b.stats().await);
        }
        out
    }
}
