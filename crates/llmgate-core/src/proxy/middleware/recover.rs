use async_trait::async_trait;
use axum::response::Response;
use futures::FutureExt;
use llmgate_types::ProxyError;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

use super::{problem_response, Middleware, Transport, TransportError};
use crate::proxy::ProxyRequest;

struct RecoverTransport {
    inner: Arc<dyn Transport>,
}

#[async_trait]
impl Transport for RecoverTransport {
    async fn round_trip(&self, req: ProxyRequest) -> Result<Response, TransportError> {
        let suffix = req.suffix.clone();
        match AssertUnwindSafe(self.inner.round_trip(req)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                error!(
                    suffix = %suffix,
                    panic = %panic_message(panic.as_ref()),
                    "Recovered panic in transport chain"
                );
                Ok(problem_response(&ProxyError::Internal))
            },
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Turn a panic anywhere inside into a `500` problem response.
pub fn with_recover() -> Middleware {
    Arc::new(|inner: Arc<dyn Transport>| -> Arc<dyn Transport> {
        Arc::new(RecoverTransport { inner })
    })
}
