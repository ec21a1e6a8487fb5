//! Startup wiring: configuration → [`ServerDependencies`].

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use llmgate_core::auth::{
    Argon2idHasher, Authenticator, KeyAuthenticator, KeyWriter, MemoryKeyStore,
    NoopAuthenticator,
};
use llmgate_core::kv::KvStore;
use llmgate_core::provider::adapters_from_registry;
use llmgate_core::proxy::middleware::{
    AllowAll, FixedWindowLimiter, Limiter, NoopRecorder, PolicyEngine, Recorder,
    TokenBucketLimiter,
};
use llmgate_core::proxy::prometheus::init_metrics;
use llmgate_core::proxy::{build_http_client, PrometheusRecorder, ServerDependencies};
use llmgate_core::{build_store, ModelRegistry};
use llmgate_types::{GatewayConfig, KeyRecord, PolicyMap, RateLimitKind};

/// Connect the KV store, seed the registry and assemble the request path.
pub async fn build_dependencies(
    config: &GatewayConfig,
    keys_file: Option<&Path>,
    policies_file: Option<&Path>,
) -> Result<ServerDependencies> {
    let store = build_store(&config.kv).await.context("failed to open KV store")?;

    let registry =
        ModelRegistry::new(Arc::clone(&store)).with_page_hint(config.kv.scan_page_hint);
    let adapters = adapters_from_registry(&registry, &config.providers)
        .await
        .context("failed to build provider adapters")?;

    let authenticator = build_authenticator(config, keys_file).await?;
    let limiter = build_limiter(config, store);
    let policies = match policies_file {
        Some(path) => {
            let policies = load_policies(path).await?;
            info!(apps = policies.len(), path = %path.display(), "Loaded app policies");
            PolicyEngine::new(policies)
        },
        None => PolicyEngine::default(),
    };
    let recorder: Arc<dyn Recorder> = if config.proxy.metrics_enabled {
        init_metrics().context("failed to install Prometheus recorder")?;
        Arc::new(PrometheusRecorder)
    } else {
        Arc::new(NoopRecorder)
    };

    let client = build_http_client().context("failed to build upstream HTTP client")?;
    Ok(ServerDependencies::new(adapters, authenticator, client)
        .with_limiter(limiter)
        .with_recorder(recorder)
        .with_policies(policies)
        .with_limits(
            config.proxy.body_max_bytes,
            Duration::from_secs(config.proxy.write_deadline_secs),
        )
        .with_metrics_endpoint(config.proxy.metrics_enabled))
}

async fn build_authenticator(
    config: &GatewayConfig,
    keys_file: Option<&Path>,
) -> Result<Arc<dyn Authenticator>> {
    if config.auth.disabled {
        warn!("Authentication disabled; every request runs as tenant 'default'");
        return Ok(Arc::new(NoopAuthenticator));
    }

    let keys = Arc::new(MemoryKeyStore::new());
    if let Some(path) = keys_file {
        let loaded = load_keys(&keys, path).await?;
        info!(count = loaded, path = %path.display(), "Loaded API keys");
    }
    if keys.is_empty() {
        warn!("No API keys loaded; every proxied request will be rejected");
    }

    let hasher = Argon2idHasher::from(&config.auth);
    let authenticator =
        KeyAuthenticator::new(keys, hasher).context("failed to initialise authenticator")?;
    Ok(Arc::new(authenticator))
}

/// Insert every record of the JSON array at `path`.
pub async fn load_keys(store: &MemoryKeyStore, path: &Path) -> Result<usize> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read keys file {}", path.display()))?;
    let records: Vec<KeyRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid keys file {}", path.display()))?;

    let count = records.len();
    for record in records {
        let key_id = record.key_id.clone();
        store
            .insert(record)
            .await
            .with_context(|| format!("failed to load key {key_id}"))?;
    }
    Ok(count)
}

/// Parse the JSON object at `path` mapping app names (or `"*"`) to policies.
pub async fn load_policies(path: &Path) -> Result<PolicyMap> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read policies file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid policies file {}", path.display()))
}

fn build_limiter(config: &GatewayConfig, store: Arc<dyn KvStore>) -> Arc<dyn Limiter> {
    let rpm = config.limits.requests_per_minute;
    if rpm == 0 {
        return Arc::new(AllowAll);
    }
    info!(requests_per_minute = rpm, kind = ?config.limits.kind, "Rate limiting enabled");
    match config.limits.kind {
        RateLimitKind::FixedWindow => Arc::new(FixedWindowLimiter::new(store, rpm)),
        RateLimitKind::TokenBucket => Arc::new(TokenBucketLimiter::new(rpm)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use llmgate_core::auth::{generate_key, NewKey};

    #[tokio::test]
    async fn test_load_keys_round_trip() {
        let hasher = Argon2idHasher::new(1, 64, 1, 32);
        let (_, record) = generate_key(
            &hasher,
            NewKey { tenant: "acme".into(), app: "chat".into(), ..NewKey::default() },
        )
        .unwrap();

        let path = std::env::temp_dir().join(format!("llmgate-keys-{}.json", record.key_id));
        std::fs::write(&path, serde_json::to_string(&vec![record]).unwrap()).unwrap();

        let store = MemoryKeyStore::new();
        assert_eq!(load_keys(&store, &path).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_build_dependencies_with_defaults() {
        let config = GatewayConfig::default();
        let deps = build_dependencies(&config, None, None).await.unwrap();
        // The OpenAI adapter is always present.
        assert!(deps.adapters.iter().any(|a| a.prefix() == "/openai"));
        assert!(!deps.metrics_enabled);
        assert!(deps.policies.is_empty());
    }

    #[tokio::test]
    async fn test_load_policies() {
        let path =
            std::env::temp_dir().join(format!("llmgate-policies-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"chat": {"allowed_models": ["gpt-4o"]}, "*": {"max_request_bytes": 4096}}"#,
        )
        .unwrap();

        let policies = load_policies(&path).await.unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(policies["chat"].allowed_models, vec!["gpt-4o".to_string()]);

        let engine = PolicyEngine::new(policies);
        assert_eq!(engine.policy_for("batch").map(|p| p.max_request_bytes), Some(4096));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_load_policies_rejects_malformed_file() {
        let path =
            std::env::temp_dir().join(format!("llmgate-bad-policies-{}.json", std::process::id()));
        std::fs::write(&path, r#"["not", "a", "map"]"#).unwrap();
        let err = load_policies(&path).await.unwrap_err();
        assert!(err.to_string().contains("invalid policies file"));
        let _ = std::fs::remove_file(&path);
    }
}
