#![allow(clippy::tests_outside_test_module, reason = "integration tests live in tests/ dir")]
#![allow(clippy::expect_used, reason = "integration test; panics are the assertion mechanism")]

use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, DATE, RETRY_AFTER};
use axum::http::StatusCode;
use axum_test::TestServer;
use bytes::Bytes;
use std::sync::Arc;

use llmgate_core::auth::{
    generate_key, Argon2idHasher, Authenticator, KeyAuthenticator, KeyWriter, MemoryKeyStore,
    NewKey, NoopAuthenticator,
};
use llmgate_core::kv::MemoryStore;
use llmgate_core::provider::{Adapter, AzureAdapter, AzureEntry, KeySource, OpenAiAdapter};
use llmgate_core::proxy::middleware::FixedWindowLimiter;
use llmgate_core::proxy::{build_http_client, build_router, PolicyEngine, ServerDependencies};
use llmgate_types::{AppPolicy, PolicyMap};
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHAT_BODY: &str = r#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#;
const API_VERSION: &str = "2024-07-01-preview";

fn server_with(
    adapters: Vec<Arc<dyn Adapter>>,
    authenticator: Arc<dyn Authenticator>,
) -> TestServer {
    let client = build_http_client().expect("client");
    let deps = ServerDependencies::new(adapters, authenticator, client);
    TestServer::new(build_router(deps)).expect("test server")
}

fn azure(base: &str, deployment: &str) -> Arc<dyn Adapter> {
    Arc::new(
        AzureAdapter::new()
            .with_keys(KeySource::fixed("sekret-key"))
            .with_global("gpt-4o", AzureEntry::new(base, deployment, API_VERSION)),
    )
}

#[tokio::test]
async fn test_azure_chat_completion_rewrite() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/dev-openai-gpt4-1/chat/completions"))
        .and(query_param("stream", "true"))
        .and(query_param("api-version", API_VERSION))
        .and(header("api-key", "sekret-key"))
        .and(body_string(CHAT_BODY))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":"chatcmpl-1"}"#))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = server_with(
        vec![azure(&upstream.uri(), "dev-openai-gpt4-1")],
        Arc::new(NoopAuthenticator),
    );
    let response = server
        .post("/azure/openai/v1/chat/completions")
        .add_query_param("stream", "true")
        .authorization_bearer("client-token")
        .content_type("application/json")
        .bytes(Bytes::from_static(CHAT_BODY.as_bytes()))
        .await;

    response.assert_status_ok();
    assert_eq!(response.text(), r#"{"id":"chatcmpl-1"}"#);

    let received = upstream.received_requests().await.expect("recording enabled");
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get(AUTHORIZATION.as_str()).is_none());
}

#[tokio::test]
async fn test_azure_embeddings_merge_query() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/dep-123/embeddings"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = server_with(vec![azure(&upstream.uri(), "dep-123")], Arc::new(NoopAuthenticator));
    server
        .post("/azure/openai/v1/embeddings")
        .add_raw_query_param("x=1&x=2")
        .content_type("application/json")
        .bytes(Bytes::from_static(br#"{"model":"gpt-4o","input":"hi"}"#))
        .await
        .assert_status_ok();

    let received = upstream.received_requests().await.expect("recording enabled");
    let pairs: Vec<(String, String)> =
        received[0].url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
    assert!(pairs.contains(&("x".to_string(), "1".to_string())));
    assert!(pairs.contains(&("x".to_string(), "2".to_string())));
    assert!(pairs.contains(&("api-version".to_string(), API_VERSION.to_string())));
}

#[tokio::test]
async fn test_openai_alias_rewrite() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-upstream"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&upstream)
        .await;

    let openai = OpenAiAdapter::new()
        .with_base_url(&upstream.uri())
        .expect("valid base")
        .with_keys(KeySource::fixed("sk-upstream"))
        .with_alias("gpt-4o", "gpt-4o-2024-08-06");
    let server = server_with(vec![Arc::new(openai)], Arc::new(NoopAuthenticator));
    server
        .post("/openai/v1/chat/completions")
        .authorization_bearer("client-token")
        .content_type("application/json")
        .bytes(Bytes::from_static(CHAT_BODY.as_bytes()))
        .await
        .assert_status_ok();

    let received = upstream.received_requests().await.expect("recording enabled");
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).expect("json body");
    assert_eq!(body["model"], "gpt-4o-2024-08-06");
    let declared = received[0]
        .headers
        .get(CONTENT_LENGTH.as_str())
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    assert_eq!(declared, Some(received[0].body.len()));
}

#[tokio::test]
async fn test_unknown_model_is_bad_request() {
    let azure: Arc<dyn Adapter> =
        Arc::new(AzureAdapter::new().with_keys(KeySource::fixed("sekret-key")));
    let server = server_with(vec![azure], Arc::new(NoopAuthenticator));

    let response = server
        .post("/azure/openai/v1/chat/completions")
        .content_type("application/json")
        .bytes(Bytes::from_static(br#"{"model":"nope"}"#))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(
        response.header("content-type").to_str().expect("ascii"),
        "application/problem+json"
    );
    assert!(response.text().contains("unknown model"));
}

#[tokio::test]
async fn test_unauthorized_responses_are_uniform() {
    let hasher = Argon2idHasher::new(1, 64, 1, 32);
    let keys = Arc::new(MemoryKeyStore::new());
    let (_token, record) = generate_key(
        &hasher,
        NewKey { tenant: "acme".into(), app: "chat".into(), ..NewKey::default() },
    )
    .expect("key issued");
    let key_id = record.key_id.clone();
    keys.insert(record).await.expect("stored");

    let authenticator = KeyAuthenticator::new(keys, hasher).expect("authenticator");
    let openai = OpenAiAdapter::new().with_base_url("http://127.0.0.1:9").expect("valid base");
    let server = server_with(vec![Arc::new(openai)], Arc::new(authenticator));

    let mut responses = Vec::new();
    for token in ["unknown.XXX".to_string(), format!("{key_id}.WRONG")] {
        let response = server
            .post("/openai/v1/chat/completions")
            .authorization_bearer(token)
            .content_type("application/json")
            .bytes(Bytes::from_static(CHAT_BODY.as_bytes()))
            .await;
        let mut headers = response.headers().clone();
        headers.remove(DATE);
        responses.push((response.status_code(), response.text(), headers));
    }

    assert_eq!(responses[0].0, StatusCode::UNAUTHORIZED);
    assert_eq!(responses[0], responses[1]);
}

#[tokio::test]
async fn test_valid_key_reaches_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer sk-upstream"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&upstream)
        .await;

    let hasher = Argon2idHasher::new(1, 64, 1, 32);
    let keys = Arc::new(MemoryKeyStore::new());
    let (token, record) = generate_key(
        &hasher,
        NewKey { tenant: "acme".into(), app: "chat".into(), ..NewKey::default() },
    )
    .expect("key issued");
    keys.insert(record).await.expect("stored");

    let openai = OpenAiAdapter::new()
        .with_base_url(&upstream.uri())
        .expect("valid base")
        .with_keys(KeySource::fixed("sk-upstream"));
    let authenticator = KeyAuthenticator::new(keys, hasher).expect("authenticator");
    let server = server_with(vec![Arc::new(openai)], Arc::new(authenticator));

    server
        .post("/openai/v1/embeddings")
        .authorization_bearer(token)
        .content_type("application/json")
        .bytes(Bytes::from_static(br#"{"model":"text-embedding-3-small","input":"hi"}"#))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_rate_limit_rejects_over_budget() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let openai = OpenAiAdapter::new()
        .with_base_url(&upstream.uri())
        .expect("valid base")
        .with_keys(KeySource::fixed("sk-upstream"));
    let client = build_http_client().expect("client");
    let deps = ServerDependencies::new(vec![Arc::new(openai)], Arc::new(NoopAuthenticator), client)
        .with_limiter(Arc::new(FixedWindowLimiter::new(Arc::new(MemoryStore::new()), 1)));
    let server = TestServer::new(build_router(deps)).expect("test server");

    let send = || {
        server
            .post("/openai/v1/chat/completions")
            .content_type("application/json")
            .bytes(Bytes::from_static(CHAT_BODY.as_bytes()))
    };
    send().await.assert_status_ok();

    let limited = send().await;
    limited.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = limited
        .header(RETRY_AFTER)
        .to_str()
        .expect("ascii")
        .parse()
        .expect("whole seconds");
    assert!((1..=60).contains(&retry_after));
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let openai = OpenAiAdapter::new().with_base_url("http://127.0.0.1:9").expect("valid base");
    let client = build_http_client().expect("client");
    let deps = ServerDependencies::new(vec![Arc::new(openai)], Arc::new(NoopAuthenticator), client)
        .with_limits(16, std::time::Duration::from_secs(5));
    let server = TestServer::new(build_router(deps)).expect("test server");

    let response = server
        .post("/openai/v1/chat/completions")
        .content_type("application/json")
        .bytes(Bytes::from_static(CHAT_BODY.as_bytes()))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.text().contains(r#""title":"too-large""#));
}

#[tokio::test]
async fn test_policy_blocks_model_before_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"id":"x","usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#,
        ))
        .expect(1)
        .mount(&upstream)
        .await;

    let openai = OpenAiAdapter::new()
        .with_base_url(&upstream.uri())
        .expect("valid base")
        .with_keys(KeySource::fixed("sk-upstream"));
    let mut policies = PolicyMap::new();
    policies.insert(
        "default".into(),
        AppPolicy { allowed_models: vec!["gpt-4o-mini".into()], ..AppPolicy::default() },
    );
    let client = build_http_client().expect("client");
    let deps = ServerDependencies::new(vec![Arc::new(openai)], Arc::new(NoopAuthenticator), client)
        .with_policies(PolicyEngine::new(policies));
    let server = TestServer::new(build_router(deps)).expect("test server");

    let denied = server
        .post("/openai/v1/chat/completions")
        .content_type("application/json")
        .bytes(Bytes::from_static(CHAT_BODY.as_bytes()))
        .await;
    denied.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(denied.text().contains(r#""title":"policy-violation""#));

    let allowed = server
        .post("/openai/v1/chat/completions")
        .content_type("application/json")
        .bytes(Bytes::from_static(br#"{"model":"gpt-4o-mini","prompt":"hi"}"#))
        .await;
    allowed.assert_status_ok();
    assert!(allowed.text().contains(r#""total_tokens":7"#));
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    // Nothing listens on the discard port.
    let openai = OpenAiAdapter::new()
        .with_base_url("http://127.0.0.1:9")
        .expect("valid base")
        .with_keys(KeySource::fixed("sk-upstream"));
    let server = server_with(vec![Arc::new(openai)], Arc::new(NoopAuthenticator));

    let response = server
        .post("/openai/v1/chat/completions")
        .content_type("application/json")
        .bytes(Bytes::from_static(CHAT_BODY.as_bytes()))
        .await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    assert!(response.text().contains(r#""title":"bad-gateway""#));
}
