//! Base transport: turn a [`ProxyRequest`] into an upstream HTTP exchange.

use async_trait::async_trait;
use axum::http::header::{CONNECTION, HOST, TE, TRAILER, TRANSFER_ENCODING, UPGRADE};
use axum::http::HeaderMap;
use axum::response::Response;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::middleware::{Transport, TransportError};
use super::streaming::stream_response;
use super::ProxyRequest;
use crate::provider::{force_content_length, UpstreamRequest};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

/// Shared upstream client. There is no overall timeout: streamed
/// generations may run for minutes.
pub fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE)
        .tcp_nodelay(true)
        .build()
}

/// Headers that describe a single connection and must not be forwarded.
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in [CONNECTION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE] {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}

#[derive(Debug, Clone)]
pub struct UpstreamTransport {
    client: reqwest::Client,
    write_deadline: Duration,
}

impl UpstreamTransport {
    pub fn new(client: reqwest::Client, write_deadline: Duration) -> Self {
        Self { client, write_deadline }
    }

    /// Adapter-facing request: caller headers and body, a placeholder URL
    /// carrying suffix and query, exact `Content-Length`.
    fn prepare(req: &mut ProxyRequest) -> Result<UpstreamRequest, TransportError> {
        let raw = if req.query.is_empty() {
            format!("http://localhost{}", req.suffix)
        } else {
            format!("http://localhost{}?{}", req.suffix, req.query)
        };
        let url = Url::parse(&raw)
            .map_err(|e| TransportError::BadRequest(format!("invalid request url: {e}")))?;

        let mut headers = std::mem::take(&mut req.headers);
        strip_hop_by_hop(&mut headers);
        headers.remove(HOST);

        let mut upstream =
            UpstreamRequest::new(req.method.clone(), url, headers, std::mem::take(&mut req.body));
        let len = upstream.body.len();
        force_content_length(&mut upstream, len);
        Ok(upstream)
    }
}

#[async_trait]
impl Transport for UpstreamTransport {
    async fn round_trip(&self, mut req: ProxyRequest) -> Result<Response, TransportError> {
        let info = req.info();
        let mut upstream = Self::prepare(&mut req)?;
        req.adapter.rewrite(&mut upstream, &req.suffix, &info)?;

        let provider = req.adapter.name();
        debug!(
            provider = %provider,
            model = %info.model,
            tenant = %info.tenant,
            host = upstream.url.host_str().unwrap_or_default(),
            "Forwarding upstream"
        );

        let response = self
            .client
            .request(upstream.method, upstream.url)
            .headers(upstream.headers)
            .body(upstream.body)
            .send()
            .await?;
        Ok(stream_response(response, self.write_deadline, provider))
    }
}
