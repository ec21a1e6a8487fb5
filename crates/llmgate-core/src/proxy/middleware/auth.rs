use async_trait::async_trait;
use axum::response::Response;
use llmgate_types::ProxyError;
use std::sync::Arc;
use tracing::debug;

use super::{problem_response, Middleware, Transport, TransportError};
use crate::auth::{extract_token, Authenticator};
use crate::proxy::prometheus::record_auth_failure;
use crate::proxy::ProxyRequest;

struct AuthTransport {
    inner: Arc<dyn Transport>,
    authenticator: Arc<dyn Authenticator>,
}

#[async_trait]
impl Transport for AuthTransport {
    async fn round_trip(&self, mut req: ProxyRequest) -> Result<Response, TransportError> {
        let token = extract_token(&req.headers).to_string();
        match self.authenticator.authenticate(&token).await {
            Ok(identity) => {
                req.identity = identity;
                self.inner.round_trip(req).await
            },
            Err(reason) => {
                debug!(%reason, suffix = %req.suffix, "Rejected credential");
                record_auth_failure();
                Ok(problem_response(&ProxyError::Unauthorized))
            },
        }
    }
}

/// Authenticate the caller and attach its [`Identity`](crate::auth::Identity).
///
/// Every failure answers the same `401` so callers cannot tell an unknown key
/// from a wrong secret.
pub fn with_auth(authenticator: Arc<dyn Authenticator>) -> Middleware {
    Arc::new(move |inner: Arc<dyn Transport>| -> Arc<dyn Transport> {
        Arc::new(AuthTransport { inner, authenticator: Arc::clone(&authenticator) })
    })
}
