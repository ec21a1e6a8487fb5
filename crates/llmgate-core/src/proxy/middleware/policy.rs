//! Per-app policies and upstream token usage.
//!
//! Before forwarding, the app's policy (or the `"*"` entry) is checked in
//! order: model allowlist, request size, estimated prompt tokens. A failed
//! check short-circuits with a 429 `policy-violation` problem. Successful
//! responses are tapped on their way to the client and the last `usage`
//! object seen in the body is handed to the [`Recorder`].

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use llmgate_types::{AppPolicy, PolicyMap, ProxyError, TokenUsage, DEFAULT_POLICY_APP};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{problem_response, Middleware, Recorder, Transport, TransportError};
use crate::proxy::prometheus::record_policy_violation;
use crate::proxy::ProxyRequest;

pub const POLICY_MODEL_ALLOWLIST: &str = "model-allowlist";
pub const POLICY_REQUEST_SIZE: &str = "request-size";
pub const POLICY_TOKEN_LIMIT: &str = "token-limit";

/// Bodies larger than this are passed through without usage capture.
const USAGE_CAPTURE_MAX_BYTES: usize = 1024 * 1024;

/// Immutable app → policy table loaded at boot.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    policies: PolicyMap,
}

impl PolicyEngine {
    pub fn new(policies: PolicyMap) -> Self {
        Self { policies }
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// The app's own entry, else the `"*"` entry.
    pub fn policy_for(&self, app: &str) -> Option<&AppPolicy> {
        self.policies.get(app).or_else(|| self.policies.get(DEFAULT_POLICY_APP))
    }
}

/// Run the pre-request checks of `policy` against `req`.
pub fn check_request(policy: &AppPolicy, req: &ProxyRequest) -> Result<(), ProxyError> {
    if !policy.allows_model(&req.model) {
        return Err(violation(
            POLICY_MODEL_ALLOWLIST,
            format!("model {:?} is not allowed for this application", req.model),
        ));
    }

    if policy.max_request_bytes > 0 && req.body.len() > policy.max_request_bytes {
        return Err(violation(
            POLICY_REQUEST_SIZE,
            format!(
                "request body is {} bytes, limit is {}",
                req.body.len(),
                policy.max_request_bytes
            ),
        ));
    }

    if policy.max_prompt_tokens == 0 && policy.max_total_tokens == 0 {
        return Ok(());
    }
    let estimate = estimate_prompt_tokens(&req.body);
    if policy.max_prompt_tokens > 0 && estimate > policy.max_prompt_tokens {
        return Err(violation(
            POLICY_TOKEN_LIMIT,
            format!(
                "estimated prompt is {estimate} tokens, limit is {}",
                policy.max_prompt_tokens
            ),
        ));
    }
    // Assume the completion is about as long as the prompt.
    if policy.max_total_tokens > 0 && estimate.saturating_mul(2) > policy.max_total_tokens {
        return Err(violation(
            POLICY_TOKEN_LIMIT,
            format!(
                "estimated total is {} tokens, limit is {}",
                estimate.saturating_mul(2),
                policy.max_total_tokens
            ),
        ));
    }
    Ok(())
}

fn violation(policy: &str, reason: String) -> ProxyError {
    ProxyError::PolicyViolation { policy: policy.to_string(), reason }
}

/// Log reported usage that exceeds `policy`. The response is already on
/// its way, so nothing is rejected here.
fn check_usage(policy: &AppPolicy, usage: &TokenUsage, req: &ProxyRequest) {
    let over_completion = policy.max_completion_tokens > 0
        && usage.completion_tokens > u64::from(policy.max_completion_tokens);
    let over_total =
        policy.max_total_tokens > 0 && usage.total_tokens > u64::from(policy.max_total_tokens);
    if over_completion || over_total {
        warn!(
            app = %req.identity.app,
            model = %req.model,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "Upstream usage exceeded the application's token policy"
        );
    }
}

/// Rough token count: ~4 ASCII chars or ~1.5 other chars per token, plus
/// 15% headroom.
pub fn estimate_text_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    let (ascii, other) = text.chars().fold((0u32, 0u32), |(ascii, other), c| {
        if c.is_ascii() {
            (ascii.saturating_add(1), other)
        } else {
            (ascii, other.saturating_add(1))
        }
    });
    let raw = (f64::from(ascii) / 4.0).ceil() + (f64::from(other) / 1.5).ceil();
    (raw * 1.15).ceil() as u32
}

/// Estimate the prompt tokens of an OpenAI-shaped body: chat `messages`,
/// completion `prompt` or embedding `input`. Unparseable bodies count as
/// their raw text.
pub fn estimate_prompt_tokens(body: &[u8]) -> u32 {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return estimate_text_tokens(&String::from_utf8_lossy(body));
    };

    if let Some(messages) = value.get("messages").and_then(Value::as_array) {
        // Per-message framing plus the reply primer.
        let framing = (messages.len() as u32).saturating_mul(4).saturating_add(3);
        return messages
            .iter()
            .filter_map(|m| m.get("content"))
            .map(content_tokens)
            .fold(framing, u32::saturating_add);
    }

    ["prompt", "input"]
        .iter()
        .find_map(|field| value.get(*field))
        .map_or(0, content_tokens)
}

/// A string, an array of strings, or an array of `{ "text": ... }` parts.
fn content_tokens(content: &Value) -> u32 {
    match content {
        Value::String(text) => estimate_text_tokens(text),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(text) => estimate_text_tokens(text),
                other => other.get("text").and_then(Value::as_str).map_or(0, estimate_text_tokens),
            })
            .fold(0, u32::saturating_add),
        _ => 0,
    }
}

#[derive(Deserialize)]
struct UsageEnvelope {
    usage: Option<TokenUsage>,
}

/// The non-empty `usage` object of one JSON document, if any.
pub(crate) fn parse_usage(json: &[u8]) -> Option<TokenUsage> {
    serde_json::from_slice::<UsageEnvelope>(json)
        .ok()?
        .usage
        .filter(|usage| !usage.is_empty())
}

/// Collects usage from a response body as it streams past.
///
/// JSON bodies are buffered up to [`USAGE_CAPTURE_MAX_BYTES`] and parsed at
/// the end. Event streams are scanned line by line and the last `data:`
/// event carrying usage wins.
#[derive(Debug)]
pub(crate) struct UsageTap {
    sse: bool,
    buf: Vec<u8>,
    overflowed: bool,
    last: Option<TokenUsage>,
}

impl UsageTap {
    pub(crate) fn new(sse: bool) -> Self {
        Self { sse, buf: Vec::new(), overflowed: false, last: None }
    }

    pub(crate) fn feed(&mut self, chunk: &[u8]) {
        if !self.sse {
            if self.overflowed {
                return;
            }
            if self.buf.len() + chunk.len() > USAGE_CAPTURE_MAX_BYTES {
                self.overflowed = true;
                self.buf = Vec::new();
                return;
            }
            self.buf.extend_from_slice(chunk);
            return;
        }

        self.buf.extend_from_slice(chunk);
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.scan_line(&line);
        }
        if self.buf.len() > USAGE_CAPTURE_MAX_BYTES {
            // An event this large is not a usage chunk.
            self.buf.clear();
        }
    }

    fn scan_line(&mut self, line: &[u8]) {
        let line = line.trim_ascii();
        let Some(data) = line.strip_prefix(b"data:") else {
            return;
        };
        let data = data.trim_ascii_start();
        if data == b"[DONE]" {
            return;
        }
        if let Some(usage) = parse_usage(data) {
            self.last = Some(usage);
        }
    }

    pub(crate) fn finish(mut self) -> Option<TokenUsage> {
        if self.sse {
            let rest = std::mem::take(&mut self.buf);
            self.scan_line(&rest);
            return self.last;
        }
        if self.overflowed {
            return None;
        }
        parse_usage(&self.buf)
    }
}

/// Forward `response` unchanged, reporting usage once the body has been
/// fully read.
fn tap_usage(
    response: Response,
    mut req: ProxyRequest,
    policy: Option<AppPolicy>,
    recorder: Arc<dyn Recorder>,
) -> Response {
    req.body = Bytes::new();
    let sse = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));

    let (parts, body) = response.into_parts();
    let mut data = body.into_data_stream();
    let stream = async_stream::stream! {
        let mut tap = UsageTap::new(sse);
        while let Some(chunk) = data.next().await {
            if let Ok(bytes) = &chunk {
                tap.feed(bytes);
            }
            yield chunk;
        }
        match tap.finish() {
            Some(usage) => {
                recorder.record_usage(&req, &usage);
                if let Some(policy) = &policy {
                    check_usage(policy, &usage, &req);
                }
            },
            None => debug!(model = %req.model, "Response carried no usage"),
        }
    };
    Response::from_parts(parts, Body::from_stream(stream))
}

struct PolicyTransport {
    inner: Arc<dyn Transport>,
    engine: Arc<PolicyEngine>,
    recorder: Arc<dyn Recorder>,
}

#[async_trait]
impl Transport for PolicyTransport {
    async fn round_trip(&self, req: ProxyRequest) -> Result<Response, TransportError> {
        // Policies are keyed by app; requests without one are not checked.
        let policy = if req.identity.app.is_empty() {
            None
        } else {
            self.engine.policy_for(&req.identity.app).cloned()
        };

        if let Some(policy) = &policy {
            if let Err(err) = check_request(policy, &req) {
                if let ProxyError::PolicyViolation { policy: name, reason } = &err {
                    warn!(
                        app = %req.identity.app,
                        model = %req.model,
                        policy = %name,
                        reason = %reason,
                        "Request rejected by policy"
                    );
                    record_policy_violation(name);
                }
                return Ok(problem_response(&err));
            }
        }

        let labels = req.clone();
        let response = self.inner.round_trip(req).await?;
        if !response.status().is_success() {
            return Ok(response);
        }
        Ok(tap_usage(response, labels, policy, Arc::clone(&self.recorder)))
    }
}

/// Enforce per-app policies and report upstream token usage to `recorder`.
pub fn with_policies(engine: Arc<PolicyEngine>, recorder: Arc<dyn Recorder>) -> Middleware {
    Arc::new(move |inner: Arc<dyn Transport>| -> Arc<dyn Transport> {
        Arc::new(PolicyTransport {
            inner,
            engine: Arc::clone(&engine),
            recorder: Arc::clone(&recorder),
        })
    })
}
