//! Key-value store abstraction.
//!
//! A string → string map with optional TTL. Two backends share the
//! [`KvStore`] contract:
//!
//! - [`MemoryStore`]: in-process map with monotonic-time expiry
//! - [`RedisStore`]: networked backend using cursor `SCAN`
//!
//! [`CircuitBreakerStore`] can wrap any backend so a failing network store
//! degrades to "not found" instead of stalling the request path.

mod circuit_breaker;
mod factory;
mod keyspace;
mod memory;
mod redis_store;

pub use circuit_breaker::{
    BreakerConfig, BreakerSummary, CircuitBreaker, CircuitBreakerStore, CircuitState,
};
pub use factory::build_store;
pub use keyspace::{escape_glob, Keyspace, MODEL_REGISTRY_PREFIX};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Default `COUNT` hint for cursor scans.
pub const DEFAULT_PAGE_HINT: usize = 256;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KvError {
    /// Networked backend failed (connection, timeout, protocol)
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("value at {key} is not an integer")]
    NotInteger { key: String },

    #[error("invalid pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },

    /// Circuit breaker is open; the store was not contacted
    #[error("kv circuit open, retry in {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("kv store closed")]
    Closed,
}

impl KvError {
    /// Failures that say the backend itself is unhealthy (as opposed to a bad
    /// value or pattern). Only these count against the circuit breaker.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Redis(_) | Self::Closed)
    }
}

pub type KvResult<T> = Result<T, KvError>;

/// String key/value store with TTL.
///
/// A `ttl` of [`Duration::ZERO`] means "never expire". A missing key is never
/// an error: `get` returns `Ok(None)`.
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()>;

    async fn del(&self, key: &str) -> KvResult<()>;

    async fn exists(&self, key: &str) -> KvResult<bool>;

    /// Increment by one; a missing key starts from zero.
    async fn incr(&self, key: &str) -> KvResult<i64> {
        self.incr_by(key, 1).await
    }

    /// Increment by `amount`; a missing key starts from zero. Existing TTL is kept.
    async fn incr_by(&self, key: &str, amount: i64) -> KvResult<i64>;

    /// Set a TTL on an existing key. Returns `false` when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool>;

    /// Every `key → value` whose key matches the glob `pattern`.
    ///
    /// Iteration is paginated internally (`page_hint` keys per round trip)
    /// and each key appears at most once.
    async fn scan_get_all(
        &self,
        pattern: &str,
        page_hint: usize,
    ) -> KvResult<BTreeMap<String, String>>;

    /// Keys matching the glob `pattern`, sorted and deduplicated.
    async fn scan_all(&self, pattern: &str, page_hint: usize) -> KvResult<Vec<String>>;

    async fn close(&self) -> KvResult<()>;
}
