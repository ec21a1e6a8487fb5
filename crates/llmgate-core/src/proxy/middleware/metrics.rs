use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::Response;
use std::sync::Arc;
use std::time::{Duration, Instant};

use llmgate_types::TokenUsage;

use super::{Middleware, Transport, TransportError};
use crate::proxy::ProxyRequest;

/// Sink for completed request measurements.
pub trait Recorder: Send + Sync + std::fmt::Debug {
    fn record(&self, req: &ProxyRequest, status: StatusCode, elapsed: Duration);

    /// Token usage reported by the upstream once its body has been read.
    fn record_usage(&self, _req: &ProxyRequest, _usage: &TokenUsage) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl Recorder for NoopRecorder {
    fn record(&self, _req: &ProxyRequest, _status: StatusCode, _elapsed: Duration) {}
}

struct MetricsTransport {
    inner: Arc<dyn Transport>,
    recorder: Arc<dyn Recorder>,
}

#[async_trait]
impl Transport for MetricsTransport {
    async fn round_trip(&self, req: ProxyRequest) -> Result<Response, TransportError> {
        let labels = req.clone();
        let start = Instant::now();
        let response = self.inner.round_trip(req).await?;
        self.recorder.record(&labels, response.status(), start.elapsed());
        Ok(response)
    }
}

/// Time each round trip up to the response head. Errors are not recorded.
pub fn with_metrics(recorder: Arc<dyn Recorder>) -> Middleware {
    Arc::new(move |inner: Arc<dyn Transport>| -> Arc<dyn Transport> {
        Arc::new(MetricsTransport { inner, recorder: Arc::clone(&recorder) })
    })
}
