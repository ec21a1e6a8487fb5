//! Circuit breaker in front of a networked KV store
//!
//! When the store keeps failing, the breaker opens and subsequent calls fail
//! fast instead of waiting on connection timeouts. Reads degrade to "not
//! found" while open so the request path stays live.
//!
//! States:
//! - Closed: Normal operation, calls pass through
//! - Open: Store is failing, calls fail immediately
//! - Half-Open: A trial request is allowed through to test recovery

mod state;


use state::Circuit;
pub use state::{BreakerConfig, BreakerSummary, CircuitState};

use async_trait::async_trait;
use metrics::counter;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{KvError, KvResult, KvStore};

/// Single-circuit breaker state machine
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    circuit: Mutex<Circuit>,
    total_trips: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            circuit: Mutex::new(Circuit::default()),
            total_trips: AtomicU64::new(0),
        }
    }

    /// Check if a call should be allowed
    ///
    /// Returns `Ok(())` if the call can proceed, `Err(Duration)` with the
    /// remaining cool-down if blocked
    pub fn should_allow(&self) -> Result<(), Duration> {
        let mut circuit = self.circuit.lock();

        match circuit.state {
            CircuitState::Closed => {
                if circuit.window_started.elapsed() >= self.config.interval {
                    circuit.counts = state::Counts::default();
                    circuit.window_started = Instant::now();
                }
                Ok(())
            },
            CircuitState::Open => {
                let elapsed = circuit.opened_at.map_or(Duration::MAX, |at| at.elapsed());
                if elapsed >= self.config.open_duration {
                    self.transition(&mut circuit, CircuitState::HalfOpen, "cool-down elapsed");
                    circuit.half_open_in_flight = 1;
                    return Ok(());
                }
                Err(self.config.open_duration.saturating_sub(elapsed))
            },
            CircuitState::HalfOpen => {
                if circuit.half_open_in_flight < self.config.half_open_max_requests {
                    circuit.half_open_in_flight += 1;
                    Ok(())
                } else {
                    Err(Duration::ZERO)
                }
            },
        }
    }

    pub fn record_success(&self) {
        let mut circuit = self.circuit.lock();
        circuit.counts.requests = circuit.counts.requests.saturating_add(1);
        circuit.counts.consecutive_failures = 0;
        circuit.counts.consecutive_successes =
            circuit.counts.consecutive_successes.saturating_add(1);

        match circuit.state {
            CircuitState::Closed => {},
            CircuitState::HalfOpen => {
                circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
                if circuit.counts.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut circuit, CircuitState::Closed, "store recovered");
                }
            },
            CircuitState::Open => {
                debug!(breaker = %self.name, "Unexpected success in open state");
            },
        }
    }

    pub fn record_failure(&self, reason: &str) {
        let mut circuit = self.circuit.lock();
        circuit.counts.requests = circuit.counts.requests.saturating_add(1);
        circuit.counts.failures = circuit.counts.failures.saturating_add(1);
        circuit.counts.consecutive_failures =
            circuit.counts.consecutive_failures.saturating_add(1);
        circuit.counts.consecutive_successes = 0;
        circuit.last_failure_reason = Some(reason.to_string());

        match circuit.state {
            CircuitState::Closed => {
                let tripped = circuit.counts.consecutive_failures
                    >= self.config.consecutive_failures
                    || circuit.counts.ratio_exceeded(&self.config);
                if tripped {
                    warn!(
                        breaker = %self.name,
                        requests = circuit.counts.requests,
                        failures = circuit.counts.failures,
                        reason = %reason,
                        "Circuit breaker opening - too many failures"
                    );
                    self.trip(&mut circuit, reason);
                }
            },
            CircuitState::HalfOpen => {
                warn!(
                    breaker = %self.name,
                    reason = %reason,
                    "Circuit breaker re-opening - trial request failed"
                );
                self.trip(&mut circuit, reason);
            },
            CircuitState::Open => {},
        }
    }

    fn trip(&self, circuit: &mut Circuit, reason: &str) {
        self.transition(circuit, CircuitState::Open, reason);
        circuit.opened_at = Some(Instant::now());
        self.total_trips.fetch_add(1, Ordering::Relaxed);
        counter!("llmgate_kv_breaker_trips_total", "breaker" => self.name.clone()).increment(1);
    }

    fn transition(&self, circuit: &mut Circuit, to: CircuitState, reason: &str) {
        let from = circuit.state;
        circuit.state = to;
        circuit.half_open_in_flight = 0;
        if to != CircuitState::Open {
            circuit.counts = state::Counts::default();
            circuit.window_started = Instant::now();
        }
        if to == CircuitState::Closed {
            circuit.opened_at = None;
            circuit.last_failure_reason = None;
        }
        info!(
            breaker = %self.name,
            from = ?from,
            to = ?to,
            reason = %reason,
            "Circuit breaker state change"
        );
    }

    pub fn state(&self) -> CircuitState {
        self.circuit.lock().state
    }

    pub fn total_trips(&self) -> u64 {
        self.total_trips.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        let mut circuit = self.circuit.lock();
        if circuit.state != CircuitState::Closed {
            info!(
                breaker = %self.name,
                previous_state = ?circuit.state,
                "Circuit breaker reset manually"
            );
        }
        *circuit = Circuit::default();
    }

    pub fn summary(&self) -> BreakerSummary {
        let circuit = self.circuit.lock();
        BreakerSummary {
            state: circuit.state,
            requests: circuit.counts.requests,
            failures: circuit.counts.failures,
            total_trips: self.total_trips(),
            last_failure_reason: circuit.last_failure_reason.clone(),
        }
    }
}

/// [`KvStore`] decorator that routes every call through a [`CircuitBreaker`].
///
/// While open: `get` → `Ok(None)`, `exists` → `Ok(false)`, scans → empty,
/// writes and counters → [`KvError::CircuitOpen`].
#[derive(Debug)]
pub struct CircuitBreakerStore<S> {
    inner: S,
    breaker: CircuitBreaker,
}

impl<S: KvStore> CircuitBreakerStore<S> {
    pub fn new(inner: S, config: BreakerConfig) -> Self {
        Self { inner, breaker: CircuitBreaker::new("kv-store", config) }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Run `call` if the breaker admits it. The outer `Err` means the call was
    /// never made.
    async fn guarded<T, F>(&self, op: &'static str, call: F) -> Result<KvResult<T>, Duration>
    where
        F: Future<Output = KvResult<T>> + Send,
    {
        self.breaker.should_allow()?;
        let result = call.await;
        match &result {
            Err(e) if e.is_unavailable() => {
                self.breaker.record_failure(&format!("{op}: {e}"));
            },
            _ => self.breaker.record_success(),
        }
        Ok(result)
    }

    fn open_error(op: &'static str, retry_after: Duration) -> KvError {
        debug!(op, retry_after_ms = retry_after.as_millis() as u64, "KV call short-circuited");
        KvError::CircuitOpen { retry_after }
    }
}

#[async_trait]
impl<S: KvStore> KvStore for CircuitBreakerStore<S> {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.guarded("get", self.inner.get(key)).await.unwrap_or(Ok(None))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        self.guarded("set", self.inner.set(key, value, ttl))
            .await
            .unwrap_or_else(|retry| Err(Self::open_error("set", retry)))
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        self.guarded("del", self.inner.del(key))
            .await
            .unwrap_or_else(|retry| Err(Self::open_error("del", retry)))
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        self.guarded("exists", self.inner.exists(key)).await.unwrap_or(Ok(false))
    }

    async fn incr_by(&self, key: &str, amount: i64) -> KvResult<i64> {
        self.guarded("incr_by", self.inner.incr_by(key, amount))
            .await
            .unwrap_or_else(|retry| Err(Self::open_error("incr_by", retry)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool> {
        self.guarded("expire", self.inner.expire(key, ttl))
            .await
            .unwrap_or_else(|retry| Err(Self::open_error("expire", retry)))
    }

    async fn scan_get_all(
        &self,
        pattern: &str,
        page_hint: usize,
    ) -> KvResult<BTreeMap<String, String>> {
        self.guarded("scan_get_all", self.inner.scan_get_all(pattern, page_hint))
            .await
            .unwrap_or_else(|_| Ok(BTreeMap::new()))
    }

    async fn scan_all(&self, pattern: &str, page_hint: usize) -> KvResult<Vec<String>> {
        self.guarded("scan_all", self.inner.scan_all(pattern, page_hint))
            .await
            .unwrap_or_else(|_| Ok(Vec::new()))
    }

    async fn close(&self) -> KvResult<()> {
        self.inner.close().await
    }
}
