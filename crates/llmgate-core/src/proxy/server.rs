//! HTTP surface: proxy routes per adapter, health and metrics endpoints.

use axum::extract::DefaultBodyLimit;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use llmgate_types::{DEFAULT_BODY_MAX_BYTES, DEFAULT_WRITE_DEADLINE_SECS};

use super::handler::{proxy_handler, ProxyCore};
use super::middleware::{
    chain, with_auth, with_metrics, with_policies, with_rate_limit, with_recover, AllowAll,
    Limiter, NoopRecorder, PolicyEngine, Recorder, Transport,
};
use super::prometheus::render_metrics;
use super::upstream::UpstreamTransport;
use crate::auth::Authenticator;
use crate::provider::Adapter;

/// Endpoints registered under every adapter prefix.
pub const DEFAULT_SUFFIXES: &[&str] =
    &["/v1/chat/completions", "/v1/completions", "/v1/embeddings"];

/// Everything [`build_router`] needs, assembled by the binary at boot.
#[derive(Debug, Clone)]
pub struct ServerDependencies {
    pub adapters: Vec<Arc<dyn Adapter>>,
    pub authenticator: Arc<dyn Authenticator>,
    pub limiter: Arc<dyn Limiter>,
    pub recorder: Arc<dyn Recorder>,
    pub policies: Arc<PolicyEngine>,
    pub client: reqwest::Client,
    pub body_max_bytes: usize,
    pub write_deadline: Duration,
    pub metrics_enabled: bool,
    pub suffixes: Vec<String>,
}

impl ServerDependencies {
    pub fn new(
        adapters: Vec<Arc<dyn Adapter>>,
        authenticator: Arc<dyn Authenticator>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            adapters,
            authenticator,
            limiter: Arc::new(AllowAll),
            recorder: Arc::new(NoopRecorder),
            policies: Arc::new(PolicyEngine::default()),
            client,
            body_max_bytes: DEFAULT_BODY_MAX_BYTES,
            write_deadline: Duration::from_secs(DEFAULT_WRITE_DEADLINE_SECS),
            metrics_enabled: false,
            suffixes: DEFAULT_SUFFIXES.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<dyn Limiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_policies(mut self, policies: PolicyEngine) -> Self {
        self.policies = Arc::new(policies);
        self
    }

    pub fn with_limits(mut self, body_max_bytes: usize, write_deadline: Duration) -> Self {
        self.body_max_bytes = body_max_bytes;
        self.write_deadline = write_deadline;
        self
    }

    /// Serve `/metrics` from the global Prometheus recorder.
    pub fn with_metrics_endpoint(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn with_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    /// Recover → auth → rate limit → policies → metrics → upstream.
    pub fn transport(&self) -> Arc<dyn Transport> {
        let base: Arc<dyn Transport> =
            Arc::new(UpstreamTransport::new(self.client.clone(), self.write_deadline));
        chain(
            base,
            &[
                with_recover(),
                with_auth(Arc::clone(&self.authenticator)),
                with_rate_limit(Arc::clone(&self.limiter)),
                with_policies(Arc::clone(&self.policies), Arc::clone(&self.recorder)),
                with_metrics(Arc::clone(&self.recorder)),
            ],
        )
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics() -> impl IntoResponse {
    render_metrics()
}

/// `POST {prefix}{suffix}` for every adapter and suffix, plus health and
/// optional metrics.
pub fn build_router(deps: ServerDependencies) -> Router {
    let core = ProxyCore::new(deps.adapters.clone(), deps.transport(), deps.body_max_bytes);

    let paths: BTreeSet<String> = core
        .adapters()
        .iter()
        .flat_map(|adapter| deps.suffixes.iter().map(move |s| format!("{}{s}", adapter.prefix())))
        .collect();

    let mut proxy_routes = Router::new();
    for path in &paths {
        debug!(path = %path, "Registering proxy route");
        proxy_routes = proxy_routes.route(path, post(proxy_handler));
    }
    info!(routes = paths.len(), adapters = core.adapters().len(), "Proxy routes registered");

    // The handler enforces its own limit while buffering.
    let proxy_routes = proxy_routes.layer(DefaultBodyLimit::disable()).with_state(core);

    let mut router =
        Router::new().route("/healthz", get(health)).route("/health", get(health));
    if deps.metrics_enabled {
        router = router.route("/metrics", get(metrics));
    }

    router.merge(proxy_routes).layer(TraceLayer::new_for_http())
}

/// Serve `router` on `listener` until Ctrl+C or SIGTERM.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Gateway listening on http://{}", addr);
    }
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::NoopAuthenticator;
    use crate::provider::{OpenAiAdapter, OPENAI_PREFIX};
    use axum::http::StatusCode;
    use axum_test::TestServer;

    fn deps() -> ServerDependencies {
        let adapter: Arc<dyn Adapter> = Arc::new(
            OpenAiAdapter::default().with_base_url("http://127.0.0.1:9").unwrap(),
        );
        ServerDependencies::new(vec![adapter], Arc::new(NoopAuthenticator), reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let server = TestServer::new(build_router(deps())).unwrap();
        for path in ["/healthz", "/health"] {
            let response = server.get(path).await;
            response.assert_status_ok();
            response.assert_json(&json!({ "status": "ok" }));
        }
    }

    #[tokio::test]
    async fn test_metrics_route_is_optional() {
        let server = TestServer::new(build_router(deps())).unwrap();
        server.get("/metrics").expect_failure().await.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_only_post_on_known_suffixes() {
        let server = TestServer::new(build_router(deps())).unwrap();
        let path = format!("{OPENAI_PREFIX}/v1/chat/completions");
        server.get(&path).expect_failure().await.assert_status(StatusCode::METHOD_NOT_ALLOWED);
        server
            .post(&format!("{OPENAI_PREFIX}/v1/models"))
            .expect_failure()
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_duplicate_suffixes_register_once() {
        let router = build_router(deps().with_suffixes(["/v1/embeddings", "/v1/embeddings"]));
        drop(router);
    }
}
