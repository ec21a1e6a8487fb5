//! Request rate limiting.
//!
//! [`FixedWindowLimiter`] counts per app per wall-clock minute in the KV
//! store so every gateway instance shares the budget. [`TokenBucketLimiter`]
//! keeps buckets in process.

use async_trait::async_trait;
use axum::response::Response;
use dashmap::DashMap;
use llmgate_types::ProxyError;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use super::{problem_response, Middleware, Transport, TransportError};
use crate::kv::KvStore;
use crate::proxy::prometheus::record_rate_limited;
use crate::proxy::ProxyRequest;

const WINDOW: Duration = Duration::from_secs(60);
const CLEANUP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { retry_after: Duration },
}

#[async_trait]
pub trait Limiter: Send + Sync + std::fmt::Debug {
    async fn allow(&self, req: &ProxyRequest) -> Decision;
}

/// Rate-limit bucket for a request: the app, else the tenant.
fn bucket_of(req: &ProxyRequest) -> &str {
    [req.identity.app.as_str(), req.identity.tenant.as_str()]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or("anonymous")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Limiter for AllowAll {
    async fn allow(&self, _req: &ProxyRequest) -> Decision {
        Decision::Allow
    }
}

/// `requests_per_minute` per app, counted under
/// `ratelimit:{app}:requests:{unix_minute}`. KV failures let the request
/// through.
#[derive(Debug, Clone)]
pub struct FixedWindowLimiter {
    store: Arc<dyn KvStore>,
    requests_per_minute: u32,
}

impl FixedWindowLimiter {
    pub fn new(store: Arc<dyn KvStore>, requests_per_minute: u32) -> Self {
        Self { store, requests_per_minute }
    }

    pub fn window_key(app: &str, unix_minute: u64) -> String {
        format!("ratelimit:{app}:requests:{unix_minute}")
    }
}

#[async_trait]
impl Limiter for FixedWindowLimiter {
    async fn allow(&self, req: &ProxyRequest) -> Decision {
        if self.requests_per_minute == 0 {
            return Decision::Allow;
        }
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let minute = now.as_secs() / 60;
        let key = Self::window_key(bucket_of(req), minute);

        let count = match self.store.incr(&key).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, key = %key, "Rate limit counter unavailable; allowing request");
                return Decision::Allow;
            },
        };
        if count == 1 {
            // Slack so the key outlives clock skew between instances.
            if let Err(e) = self.store.expire(&key, WINDOW + Duration::from_secs(5)).await {
                warn!(error = %e, key = %key, "Failed to set rate limit window expiry");
            }
        }

        if count <= i64::from(self.requests_per_minute) {
            return Decision::Allow;
        }
        let elapsed = Duration::from_secs(now.as_secs() % 60);
        Decision::Deny { retry_after: WINDOW.saturating_sub(elapsed) }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// In-process token buckets per app: capacity `requests_per_minute`,
/// refilled continuously.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: f64,
    per_second: f64,
}

impl TokenBucketLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = f64::from(requests_per_minute.max(1));
        Self { buckets: DashMap::new(), capacity, per_second: capacity / WINDOW.as_secs_f64() }
    }

    fn take(&self, bucket: &str, now: Instant) -> Decision {
        if self.buckets.len() > CLEANUP_THRESHOLD {
            self.buckets.retain(|_, b| now.duration_since(b.refilled_at) < WINDOW);
        }

        let mut entry = self
            .buckets
            .entry(bucket.to_string())
            .or_insert(Bucket { tokens: self.capacity, refilled_at: now });
        let refill = now.duration_since(entry.refilled_at).as_secs_f64() * self.per_second;
        entry.tokens = (entry.tokens + refill).min(self.capacity);
        entry.refilled_at = now;

        if entry.tokens >= 1.0 {
            entry.tokens -= 1.0;
            Decision::Allow
        } else {
            let wait = (1.0 - entry.tokens) / self.per_second;
            Decision::Deny { retry_after: Duration::from_secs_f64(wait) }
        }
    }
}

#[async_trait]
impl Limiter for TokenBucketLimiter {
    async fn allow(&self, req: &ProxyRequest) -> Decision {
        self.take(bucket_of(req), Instant::now())
    }
}

struct RateLimitTransport {
    inner: Arc<dyn Transport>,
    limiter: Arc<dyn Limiter>,
}

#[async_trait]
impl Transport for RateLimitTransport {
    async fn round_trip(&self, req: ProxyRequest) -> Result<Response, TransportError> {
        match self.limiter.allow(&req).await {
            Decision::Allow => self.inner.round_trip(req).await,
            Decision::Deny { retry_after } => {
                let app = bucket_of(&req);
                debug!(app = %app, ?retry_after, "Rate limited");
                record_rate_limited(app);
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                Ok(problem_response(&ProxyError::RateLimited { retry_after_secs: Some(secs) }))
            },
        }
    }
}

/// Reject with `429` and `Retry-After` when `limiter` denies the request.
pub fn with_rate_limit(limiter: Arc<dyn Limiter>) -> Middleware {
    Arc::new(move |inner: Arc<dyn Transport>| -> Arc<dyn Transport> {
        Arc::new(RateLimitTransport { inner, limiter: Arc::clone(&limiter) })
    })
}
