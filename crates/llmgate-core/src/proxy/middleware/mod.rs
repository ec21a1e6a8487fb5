//! Transport chain.
//!
//! A [`Transport`] turns a [`ProxyRequest`] into a response. A [`Middleware`]
//! wraps one transport in another; [`chain`] applies a list so that the first
//! middleware is the outermost layer and runs first.
//!
//! Layers short-circuit by returning a synthesized problem response as
//! `Ok`; `Err` is reserved for routing and upstream failures of the base
//! transport.

mod auth;
mod metrics;
mod policy;
mod problem;
mod rate_limiter;
mod recover;

pub use auth::with_auth;
pub use metrics::{with_metrics, NoopRecorder, Recorder};
pub use policy::{
    check_request, estimate_prompt_tokens, estimate_text_tokens, with_policies, PolicyEngine,
    POLICY_MODEL_ALLOWLIST, POLICY_REQUEST_SIZE, POLICY_TOKEN_LIMIT,
};
pub use problem::{problem_response, PROBLEM_CONTENT_TYPE};
pub use rate_limiter::{
    with_rate_limit, AllowAll, Decision, FixedWindowLimiter, Limiter, TokenBucketLimiter,
};
pub use recover::with_recover;

use async_trait::async_trait;
use axum::response::Response;
use llmgate_types::ProxyError;
use std::sync::Arc;
use thiserror::Error;

use super::ProxyRequest;
use crate::provider::ProviderError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The adapter could not route the request
    #[error(transparent)]
    Route(#[from] ProviderError),

    /// The inbound request cannot be turned into an upstream one
    #[error("{0}")]
    BadRequest(String),

    /// No upstream response was obtained
    #[error("{0}")]
    Upstream(#[from] reqwest::Error),
}

impl From<&TransportError> for ProxyError {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::Route(ProviderError::UnknownModel { model }) => {
                Self::UnknownModel { model: model.clone() }
            },
            TransportError::Route(ProviderError::RouteIncomplete { model, .. }) => {
                Self::RouteIncomplete { model: model.clone() }
            },
            TransportError::Route(other) => Self::BadRequest { message: other.to_string() },
            TransportError::BadRequest(message) => Self::BadRequest { message: message.clone() },
            TransportError::Upstream(e) => Self::UpstreamFailed { message: e.to_string() },
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, req: ProxyRequest) -> Result<Response, TransportError>;
}

pub type Middleware = Arc<dyn Fn(Arc<dyn Transport>) -> Arc<dyn Transport> + Send + Sync>;

/// Wrap `base` in `middlewares`; the first entry becomes the outermost layer.
pub fn chain(base: Arc<dyn Transport>, middlewares: &[Middleware]) -> Arc<dyn Transport> {
    middlewares.iter().rev().fold(base, |inner, middleware| middleware(inner))
}

#[cfg(test)]
mod tests;
