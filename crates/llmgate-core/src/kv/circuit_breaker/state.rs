//! Circuit breaker state types and configuration

use std::time::{Duration, Instant};

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Minimum requests in the counting interval before the ratio rule applies
    pub min_requests: u32,
    /// Failure ratio (0.0..=1.0) that trips the circuit once `min_requests` is reached
    pub failure_ratio: f64,
    /// Consecutive failures that trip the circuit regardless of the ratio
    pub consecutive_failures: u32,
    /// Closed-state counters reset after this long
    pub interval: Duration,
    /// Duration to keep circuit open before trying half-open
    pub open_duration: Duration,
    /// Trial requests admitted concurrently while half-open
    pub half_open_max_requests: u32,
    /// Successful trial requests needed to close the circuit
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            min_requests: 3,
            failure_ratio: 0.6,
            consecutive_failures: 5,
            interval: Duration::from_secs(60),
            open_duration: Duration::from_secs(30),
            half_open_max_requests: 1,
            success_threshold: 1,
        }
    }
}

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls reach the store
    Closed,
    /// Store is failing - calls fail fast
    Open,
    /// Testing recovery - limited trial requests allowed
    HalfOpen,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counts {
    pub requests: u32,
    pub failures: u32,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

impl Counts {
    pub fn ratio_exceeded(&self, config: &BreakerConfig) -> bool {
        if self.requests < config.min_requests || self.requests == 0 {
            return false;
        }
        f64::from(self.failures) / f64::from(self.requests) >= config.failure_ratio
    }
}

#[derive(Debug)]
pub(crate) struct Circuit {
    pub state: CircuitState,
    pub counts: Counts,
    pub window_started: Instant,
    pub opened_at: Option<Instant>,
    pub half_open_in_flight: u32,
    pub last_failure_reason: Option<String>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            counts: Counts::default(),
            window_started: Instant::now(),
            opened_at: None,
            half_open_in_flight: 0,
            last_failure_reason: None,
        }
    }
}

/// Point-in-time view of the breaker
#[derive(Debug, Clone)]
pub struct BreakerSummary {
    pub state: CircuitState,
    pub requests: u32,
    pub failures: u32,
    pub total_trips: u64,
    pub last_failure_reason: Option<String>,
}
