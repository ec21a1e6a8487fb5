#![allow(clippy::unwrap_used)]

use super::*;
use crate::auth::{AuthError, Authenticator, Identity};
use crate::kv::{KvStore, MemoryStore};
use crate::provider::{Adapter, RequestInfo, UpstreamRequest};
use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use llmgate_types::{AppPolicy, PolicyMap, TokenUsage};
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug)]
struct StubAdapter;

impl Adapter for StubAdapter {
    fn prefix(&self) -> &str {
        "/stub"
    }

    fn rewrite(
        &self,
        _req: &mut UpstreamRequest,
        _suffix: &str,
        _info: &RequestInfo,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Accepts exactly `"good"`; every other token is rejected with a
/// different reason.
#[derive(Debug)]
struct StubAuthenticator;

#[async_trait]
impl Authenticator for StubAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        match token {
            "good" => Ok(Identity {
                key_id: "k1".into(),
                tenant: "acme".into(),
                app: "chat".into(),
                user_id: String::new(),
            }),
            "" => Err(AuthError::Malformed),
            "expired" => Err(AuthError::Expired),
            _ => Err(AuthError::Mismatch),
        }
    }
}

/// Base transport that answers 200 with the tenant it saw.
struct Ok200;

#[async_trait]
impl Transport for Ok200 {
    async fn round_trip(&self, req: ProxyRequest) -> Result<Response, TransportError> {
        Ok(Response::new(Body::from(req.identity.tenant)))
    }
}

struct Panics;

#[async_trait]
impl Transport for Panics {
    async fn round_trip(&self, _req: ProxyRequest) -> Result<Response, TransportError> {
        panic!("boom");
    }
}

struct Unroutable;

#[async_trait]
impl Transport for Unroutable {
    async fn round_trip(&self, req: ProxyRequest) -> Result<Response, TransportError> {
        Err(ProviderError::UnknownModel { model: req.model }.into())
    }
}

#[derive(Debug, Default)]
struct CountingRecorder {
    seen: Mutex<Vec<(String, StatusCode)>>,
    usage: Mutex<Vec<(String, TokenUsage)>>,
}

impl Recorder for CountingRecorder {
    fn record(&self, req: &ProxyRequest, status: StatusCode, _elapsed: Duration) {
        self.seen.lock().push((req.model.clone(), status));
    }

    fn record_usage(&self, req: &ProxyRequest, usage: &TokenUsage) {
        self.usage.lock().push((req.identity.app.clone(), *usage));
    }
}

/// Base transport that replays a fixed response in the given chunks.
struct Replay {
    status: StatusCode,
    content_type: &'static str,
    chunks: Vec<&'static str>,
}

#[async_trait]
impl Transport for Replay {
    async fn round_trip(&self, _req: ProxyRequest) -> Result<Response, TransportError> {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            self.chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
        let mut response = Response::new(Body::from_stream(futures::stream::iter(chunks)));
        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        Ok(response)
    }
}

#[derive(Debug)]
struct DenyAll;

#[async_trait]
impl Limiter for DenyAll {
    async fn allow(&self, _req: &ProxyRequest) -> Decision {
        Decision::Deny { retry_after: Duration::from_millis(1500) }
    }
}

fn request(token: Option<&str>) -> ProxyRequest {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
    }
    let mut req = ProxyRequest::new(Method::POST, headers, Bytes::new(), Arc::new(StubAdapter));
    req.suffix = "/v1/chat/completions".into();
    req.model = "gpt-4o".into();
    req
}

fn full_chain(base: Arc<dyn Transport>, limiter: Arc<dyn Limiter>) -> Arc<dyn Transport> {
    chain(
        base,
        &[
            with_recover(),
            with_auth(Arc::new(StubAuthenticator)),
            with_rate_limit(limiter),
            with_metrics(Arc::new(NoopRecorder)),
        ],
    )
}

async fn body_bytes(response: Response) -> Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

/// Appends its tag on the way in so the call order is observable.
fn tagging(tag: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Middleware {
    struct Tag {
        inner: Arc<dyn Transport>,
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Transport for Tag {
        async fn round_trip(&self, req: ProxyRequest) -> Result<Response, TransportError> {
            self.log.lock().push(self.tag);
            self.inner.round_trip(req).await
        }
    }

    Arc::new(move |inner: Arc<dyn Transport>| -> Arc<dyn Transport> {
        Arc::new(Tag { inner, tag, log: Arc::clone(&log) })
    })
}

#[tokio::test]
async fn test_chain_first_is_outermost() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let transport = chain(
        Arc::new(Ok200),
        &[
            tagging("a", Arc::clone(&log)),
            tagging("b", Arc::clone(&log)),
            tagging("c", Arc::clone(&log)),
        ],
    );
    transport.round_trip(request(None)).await.unwrap();
    assert_eq!(*log.lock(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_auth_attaches_identity() {
    let transport = full_chain(Arc::new(Ok200), Arc::new(AllowAll));
    let response = transport.round_trip(request(Some("good"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, Bytes::from("acme"));
}

#[tokio::test]
async fn test_auth_failures_are_indistinguishable() {
    let transport = full_chain(Arc::new(Ok200), Arc::new(AllowAll));

    let mut bodies = Vec::new();
    for token in [None, Some("expired"), Some("wrong")] {
        let response = transport.round_trip(request(token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], PROBLEM_CONTENT_TYPE);
        bodies.push(body_bytes(response).await);
    }
    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(bodies[0], Bytes::from(r#"{"title":"unauthorized","status":401}"#));
}

#[tokio::test]
async fn test_rate_limit_denial_carries_retry_after() {
    let transport = full_chain(Arc::new(Ok200), Arc::new(DenyAll));
    let response = transport.round_trip(request(Some("good"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "2");
}

#[tokio::test]
async fn test_unauthenticated_requests_skip_the_limiter() {
    let transport = full_chain(Arc::new(Ok200), Arc::new(DenyAll));
    let response = transport.round_trip(request(Some("wrong"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_recover_turns_panic_into_500() {
    let transport = full_chain(Arc::new(Panics), Arc::new(AllowAll));
    let response = transport.round_trip(request(Some("good"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_bytes(response).await,
        Bytes::from(r#"{"title":"internal-server-error","status":500}"#)
    );
}

#[tokio::test]
async fn test_metrics_record_responses_only() {
    let recorder = Arc::new(CountingRecorder::default());

    let ok = chain(Arc::new(Ok200), &[with_metrics(Arc::clone(&recorder) as Arc<dyn Recorder>)]);
    ok.round_trip(request(None)).await.unwrap();

    let failing =
        chain(Arc::new(Unroutable), &[with_metrics(Arc::clone(&recorder) as Arc<dyn Recorder>)]);
    let err = failing.round_trip(request(None)).await.unwrap_err();
    assert!(matches!(ProxyError::from(&err), ProxyError::UnknownModel { .. }));

    assert_eq!(*recorder.seen.lock(), vec![("gpt-4o".to_string(), StatusCode::OK)]);
}

#[tokio::test]
async fn test_fixed_window_limits_per_app() {
    let store = Arc::new(MemoryStore::new());
    let limiter = FixedWindowLimiter::new(store, 2);

    let mut chat = request(None);
    chat.identity.app = "chat".into();
    let mut other = request(None);
    other.identity.app = "batch".into();

    assert_eq!(limiter.allow(&chat).await, Decision::Allow);
    assert_eq!(limiter.allow(&chat).await, Decision::Allow);
    let Decision::Deny { retry_after } = limiter.allow(&chat).await else {
        panic!("third request in the window should be denied");
    };
    assert!(retry_after <= Duration::from_secs(60));
    assert_eq!(limiter.allow(&other).await, Decision::Allow);
}

#[tokio::test]
async fn test_fixed_window_fails_open() {
    let store = Arc::new(MemoryStore::new());
    store.close().await.unwrap();
    let limiter = FixedWindowLimiter::new(store, 1);
    for _ in 0..3 {
        assert_eq!(limiter.allow(&request(None)).await, Decision::Allow);
    }
}

#[test]
fn test_transport_error_mapping() {
    let route = TransportError::from(ProviderError::RouteIncomplete {
        provider: "azure".into(),
        model: "m".into(),
    });
    assert!(matches!(ProxyError::from(&route), ProxyError::RouteIncomplete { .. }));

    let bad = TransportError::BadRequest("bad url".into());
    assert_eq!(ProxyError::from(&bad).http_status_code(), 400);

    let path = TransportError::from(ProviderError::UnsupportedPath { path: "/x".into() });
    assert_eq!(ProxyError::from(&path).http_status_code(), 400);
}

fn policies(entries: &[(&str, AppPolicy)]) -> Arc<PolicyEngine> {
    let map: PolicyMap =
        entries.iter().map(|(app, policy)| ((*app).to_string(), policy.clone())).collect();
    Arc::new(PolicyEngine::new(map))
}

fn policy_chain(
    base: Arc<dyn Transport>,
    engine: Arc<PolicyEngine>,
    recorder: Arc<CountingRecorder>,
) -> Arc<dyn Transport> {
    chain(
        base,
        &[
            with_auth(Arc::new(StubAuthenticator)),
            with_policies(engine, recorder as Arc<dyn Recorder>),
        ],
    )
}

#[tokio::test]
async fn test_policy_rejects_model_outside_allowlist() {
    let engine = policies(&[(
        "chat",
        AppPolicy { allowed_models: vec!["gpt-4o-mini".into()], ..AppPolicy::default() },
    )]);
    let transport =
        policy_chain(Arc::new(Ok200), engine, Arc::new(CountingRecorder::default()));

    let response = transport.round_trip(request(Some("good"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::CONTENT_TYPE], PROBLEM_CONTENT_TYPE);
    assert!(response.headers().get(header::RETRY_AFTER).is_none());
    let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(body.contains(r#""title":"policy-violation""#));
    assert!(body.contains(POLICY_MODEL_ALLOWLIST));

    let mut allowed = request(Some("good"));
    allowed.model = "GPT-4o-mini".into();
    let response = transport.round_trip(allowed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_default_policy_caps_request_size() {
    let engine = policies(&[("*", AppPolicy { max_request_bytes: 16, ..AppPolicy::default() })]);
    let transport =
        policy_chain(Arc::new(Ok200), engine, Arc::new(CountingRecorder::default()));

    let mut small = request(Some("good"));
    small.body = Bytes::from_static(b"{}");
    assert_eq!(transport.round_trip(small).await.unwrap().status(), StatusCode::OK);

    let mut large = request(Some("good"));
    large.body = Bytes::from(vec![b' '; 17]);
    let response = transport.round_trip(large).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(body.contains(POLICY_REQUEST_SIZE));
}

#[tokio::test]
async fn test_policy_rejects_oversized_prompt_estimate() {
    let engine = policies(&[("chat", AppPolicy { max_prompt_tokens: 20, ..AppPolicy::default() })]);
    let transport =
        policy_chain(Arc::new(Ok200), engine, Arc::new(CountingRecorder::default()));

    let mut req = request(Some("good"));
    let prompt = "lorem ipsum ".repeat(40);
    req.body = Bytes::from(
        serde_json::json!({ "messages": [{ "role": "user", "content": prompt }] }).to_string(),
    );
    let response = transport.round_trip(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(body.contains(POLICY_TOKEN_LIMIT));
}

#[tokio::test]
async fn test_policy_skips_requests_without_app() {
    let engine = policies(&[(
        "*",
        AppPolicy { allowed_models: vec!["none".into()], ..AppPolicy::default() },
    )]);
    let transport = chain(
        Arc::new(Ok200),
        &[with_policies(engine, Arc::new(NoopRecorder) as Arc<dyn Recorder>)],
    );
    let response = transport.round_trip(request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_usage_recorded_from_json_body() {
    let recorder = Arc::new(CountingRecorder::default());
    let base = Replay {
        status: StatusCode::OK,
        content_type: "application/json",
        chunks: vec![
            r#"{"id":"x","choices":[],"usage":{"prompt_tokens":12,"#,
            r#""completion_tokens":30,"total_tokens":42}}"#,
        ],
    };
    let transport =
        policy_chain(Arc::new(base), policies(&[]), Arc::clone(&recorder));

    let response = transport.round_trip(request(Some("good"))).await.unwrap();
    assert!(recorder.usage.lock().is_empty(), "usage is reported after the body is read");
    let body = body_bytes(response).await;
    assert!(body.ends_with(b"\"total_tokens\":42}}"));

    let usage = recorder.usage.lock().clone();
    assert_eq!(
        usage,
        vec![(
            "chat".to_string(),
            TokenUsage { prompt_tokens: 12, completion_tokens: 30, total_tokens: 42 }
        )]
    );
}

#[tokio::test]
async fn test_usage_recorded_from_event_stream() {
    let recorder = Arc::new(CountingRecorder::default());
    let base = Replay {
        status: StatusCode::OK,
        content_type: "text/event-stream",
        chunks: vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}],\"usage\":null}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,",
            "\"completion_tokens\":1,\"total_tokens\":4}}\r\n\r\n",
            "data: [DONE]\n\n",
        ],
    };
    let transport =
        policy_chain(Arc::new(base), policies(&[]), Arc::clone(&recorder));

    let response = transport.round_trip(request(Some("good"))).await.unwrap();
    let body = body_bytes(response).await;
    assert!(body.ends_with(b"data: [DONE]\n\n"));

    let usage = recorder.usage.lock().clone();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].1.total_tokens, 4);
    assert_eq!(usage[0].1.completion_tokens, 1);
}

#[tokio::test]
async fn test_usage_ignored_for_failed_responses() {
    let recorder = Arc::new(CountingRecorder::default());
    let base = Replay {
        status: StatusCode::BAD_GATEWAY,
        content_type: "application/json",
        chunks: vec![r#"{"usage":{"prompt_tokens":1,"completion_tokens":1,"total_tokens":2}}"#],
    };
    let transport =
        policy_chain(Arc::new(base), policies(&[]), Arc::clone(&recorder));

    let response = transport.round_trip(request(Some("good"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    body_bytes(response).await;
    assert!(recorder.usage.lock().is_empty());
}

#[test]
fn test_usage_tap_skips_bodies_without_usage() {
    let mut tap = policy::UsageTap::new(false);
    tap.feed(br#"{"usage":{"prompt_tokens":0,"completion_tokens":0,"total_tokens":0}}"#);
    assert_eq!(tap.finish(), None);

    let mut tap = policy::UsageTap::new(false);
    tap.feed(b"not json");
    assert_eq!(tap.finish(), None);

    let mut tap = policy::UsageTap::new(true);
    tap.feed(b"event: ping\ndata: {\"usage\":{\"total_tokens\":9}}");
    assert_eq!(tap.finish().map(|u| u.total_tokens), Some(9));
}

#[test]
fn test_prompt_estimates() {
    assert_eq!(estimate_text_tokens(""), 0);
    // 11 ASCII chars: ceil(11 / 4) = 3, plus 15% rounds up to 4
    assert_eq!(estimate_text_tokens("Hello World"), 4);
    assert!(estimate_text_tokens("你好世界") > estimate_text_tokens("abcd"));

    let chat = br#"{"messages":[{"role":"user","content":"Hello World"}]}"#;
    assert_eq!(estimate_prompt_tokens(chat), 4 + 3 + 4);

    let parts =
        br#"{"messages":[{"role":"user","content":[{"type":"text","text":"Hello World"}]}]}"#;
    assert_eq!(estimate_prompt_tokens(parts), 4 + 3 + 4);

    let completion = br#"{"prompt":["Hello World","Hello World"]}"#;
    assert_eq!(estimate_prompt_tokens(completion), 8);

    assert_eq!(estimate_prompt_tokens(b"{}"), 0);
}
