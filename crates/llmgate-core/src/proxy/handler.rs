//! Inbound request handling: buffer the body, pick the adapter, run the
//! transport chain.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use llmgate_types::ProxyError;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::middleware::{problem_response, Transport, TransportError};
use super::ProxyRequest;
use crate::provider::Adapter;

/// Body fields that may name the model, in order of precedence.
const MODEL_FIELDS: [&str; 3] = ["model", "deployment", "engine"];

/// Shared handler state: the adapter set and the assembled transport chain.
#[derive(Clone)]
pub struct ProxyCore {
    adapters: Arc<[Arc<dyn Adapter>]>,
    transport: Arc<dyn Transport>,
    body_max_bytes: usize,
}

impl std::fmt::Debug for ProxyCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCore")
            .field("adapters", &self.adapters)
            .field("body_max_bytes", &self.body_max_bytes)
            .finish_non_exhaustive()
    }
}

impl ProxyCore {
    pub fn new(
        adapters: Vec<Arc<dyn Adapter>>,
        transport: Arc<dyn Transport>,
        body_max_bytes: usize,
    ) -> Self {
        Self { adapters: adapters.into(), transport, body_max_bytes }
    }

    pub fn adapters(&self) -> &[Arc<dyn Adapter>] {
        &self.adapters
    }

    /// Adapter owning `path` and the `/v1/...` suffix after its prefix.
    ///
    /// The prefix must sit on segment boundaries; the earliest match wins,
    /// then the longest prefix. With a single adapter configured, paths
    /// without its prefix fall through to it.
    pub fn route(&self, path: &str) -> Result<(Arc<dyn Adapter>, String), ProxyError> {
        let matched = self
            .adapters
            .iter()
            .filter_map(|adapter| index_of_segment(path, adapter.prefix()).map(|at| (at, adapter)))
            .min_by_key(|(at, adapter)| (*at, std::cmp::Reverse(adapter.prefix().len())))
            .map(|(at, adapter)| (adapter, &path[at + adapter.prefix().len()..]));

        let (adapter, rest) = match (matched, self.adapters.as_ref()) {
            (Some(found), _) => found,
            (None, [only]) => (only, path),
            (None, _) => return Err(ProxyError::NoAdapter { path: path.to_string() }),
        };

        let start = rest.find("/v1/").ok_or_else(|| ProxyError::BadRequest {
            message: format!("path {path:?} has no /v1/ segment"),
        })?;
        Ok((Arc::clone(adapter), rest[start..].to_string()))
    }

    pub async fn handle(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path();

        let (adapter, suffix) = match self.route(path) {
            Ok(routed) => routed,
            Err(e) => {
                debug!(path = %path, error = %e, "No route for request");
                return problem_response(&e);
            },
        };

        let body = match read_body(body, &parts.headers, self.body_max_bytes).await {
            Ok(body) => body,
            Err(e) => {
                debug!(path = %path, error = %e, "Rejected request body");
                return problem_response(&e);
            },
        };

        let query = parts.uri.query().unwrap_or_default().to_string();
        let mut req = ProxyRequest::new(parts.method, parts.headers, body, adapter);
        req.model = extract_model(&req.body);
        req.suffix = suffix;
        req.query = query;

        match self.transport.round_trip(req).await {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    TransportError::Upstream(_) => warn!(error = %e, "Upstream request failed"),
                    _ => debug!(error = %e, "Request could not be routed"),
                }
                problem_response(&ProxyError::from(&e))
            },
        }
    }
}

pub async fn proxy_handler(State(core): State<ProxyCore>, request: Request) -> Response {
    core.handle(request).await
}

/// Buffer the whole body, refusing anything over `limit` bytes.
async fn read_body(body: Body, headers: &HeaderMap, limit: usize) -> Result<Bytes, ProxyError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(ProxyError::BodyTooLarge { limit });
    }

    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ProxyError::BadRequest {
            message: format!("failed to read request body: {e}"),
        })?;
        if buf.len() + chunk.len() > limit {
            return Err(ProxyError::BodyTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Model named by a JSON request body, or `""`.
///
/// `model` wins over `deployment`, which wins over `engine`. Blank values
/// are skipped. Bodies that are not JSON objects name no model.
pub fn extract_model(body: &[u8]) -> String {
    let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(body) else {
        return String::new();
    };
    MODEL_FIELDS
        .iter()
        .filter_map(|name| fields.get(*name).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Byte offset of `needle` in `path` where it starts at the beginning or
/// after a `/`, and ends at the end or before a `/`.
pub fn index_of_segment(path: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() || needle == "/" {
        return None;
    }
    let bytes = path.as_bytes();
    path.match_indices(needle).map(|(at, _)| at).find(|&at| {
        let end = at + needle.len();
        let left = at == 0 || bytes[at - 1] == b'/' || needle.starts_with('/');
        let right = end == bytes.len() || bytes[end] == b'/' || needle.ends_with('/');
        left && right
    })
}
