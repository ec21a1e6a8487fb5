#![allow(clippy::unwrap_used)]

use super::*;
use crate::kv::MemoryStore;
use llmgate_types::{meta_keys, Provider};

fn registry() -> ModelRegistry {
    ModelRegistry::new(Arc::new(MemoryStore::new()))
}

fn azure(tenant: &str, model: &str, deployment: &str) -> ModelDeployment {
    ModelDeployment::new(tenant, model, Provider::AzureOpenAi)
        .with_meta(meta_keys::BASE_URL, "https://res.openai.azure.com")
        .with_meta(meta_keys::DEPLOYMENT, deployment)
        .with_meta(meta_keys::API_VERSION, "2024-07-01-preview")
}

#[tokio::test]
async fn test_add_then_get_round_trips() {
    let reg = registry();
    let mut record = azure("", "gpt-4o", "dep-1");
    record.extra.insert("owner".to_string(), serde_json::json!({"team": "ml"}));

    reg.add(&record, Duration::ZERO).await.unwrap();

    let loaded = reg.get("", "gpt-4o").await.unwrap().unwrap();
    assert_eq!(loaded, record);
    assert!(reg.store().exists("modelreg::gpt-4o").await.unwrap());
}

#[tokio::test]
async fn test_update_overwrites_and_remove_deletes() {
    let reg = registry();
    reg.add(&azure("t1", "gpt-4o", "dep-1"), Duration::ZERO).await.unwrap();
    reg.update(&azure("t1", "gpt-4o", "dep-2"), Duration::ZERO).await.unwrap();

    let loaded = reg.get("t1", "gpt-4o").await.unwrap().unwrap();
    assert_eq!(loaded.deployment_name(), Some("dep-2"));
    assert_eq!(reg.all(&reg.pattern_all()).await.unwrap().len(), 1);

    reg.remove("t1", "gpt-4o").await.unwrap();
    assert!(reg.get("t1", "gpt-4o").await.unwrap().is_none());
}

#[tokio::test]
async fn test_ttl_expires_record() {
    let reg = registry();
    reg.add(&azure("", "short", "d"), Duration::from_millis(20)).await.unwrap();
    assert!(reg.get("", "short").await.unwrap().is_some());
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(reg.get("", "short").await.unwrap().is_none());
}

#[tokio::test]
async fn test_all_skips_invalid_records() {
    let reg = registry();
    reg.add(&azure("", "gpt-4o", "dep-1"), Duration::ZERO).await.unwrap();
    reg.store().set("modelreg::broken", "{not json", Duration::ZERO).await.unwrap();

    let all = reg.all(&reg.pattern_all()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].model, "gpt-4o");
}

#[tokio::test]
async fn test_get_invalid_record_is_an_error() {
    let reg = registry();
    reg.store().set("modelreg::broken", "{not json", Duration::ZERO).await.unwrap();
    assert!(matches!(reg.get("", "broken").await, Err(RegistryError::Json { .. })));
}

#[tokio::test]
async fn test_scopes_are_separated() {
    let reg = registry();
    reg.add(&azure("", "gpt-4o", "g"), Duration::ZERO).await.unwrap();
    reg.add(&azure("t1", "gpt-4o", "t1"), Duration::ZERO).await.unwrap();
    reg.add(&azure("t1", "o1", "t1-o1"), Duration::ZERO).await.unwrap();
    reg.add(&azure("t2", "gpt-4o", "t2"), Duration::ZERO).await.unwrap();

    let global = reg.all_global().await.unwrap();
    assert_eq!(global.len(), 1);
    assert_eq!(global[0].deployment_name(), Some("g"));

    let t1 = reg.all_for_tenant("t1").await.unwrap();
    let models: Vec<&str> = t1.iter().map(|r| r.model.as_str()).collect();
    assert_eq!(models, vec!["gpt-4o", "o1"]);
}

#[tokio::test]
async fn test_tenant_with_glob_characters_is_literal() {
    let reg = registry();
    reg.add(&azure("t*", "m", "star"), Duration::ZERO).await.unwrap();
    reg.add(&azure("tx", "m", "x"), Duration::ZERO).await.unwrap();

    let hits = reg.all_for_tenant("t*").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].deployment_name(), Some("star"));
}

#[tokio::test]
async fn test_deployments_for_model_point_lookup_with_global_fallback() {
    let reg = registry();
    reg.add(&azure("", "gpt-4o", "global"), Duration::ZERO).await.unwrap();
    reg.add(&azure("t1", "gpt-4o", "tenant"), Duration::ZERO).await.unwrap();

    let own = reg.deployments_for_model("gpt-4o", "t1").await.unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].deployment_name(), Some("tenant"));

    let fallback = reg.deployments_for_model("gpt-4o", "t9").await.unwrap();
    assert_eq!(fallback.len(), 1);
    assert_eq!(fallback[0].deployment_name(), Some("global"));

    assert!(reg.deployments_for_model("missing", "t1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deployments_for_model_scans_scope() {
    let reg = registry();
    reg.add(&azure("", "gpt-4o", "g1"), Duration::ZERO).await.unwrap();
    reg.add(&azure("", "o1", "g2"), Duration::ZERO).await.unwrap();
    reg.add(&azure("t1", "gpt-4o", "t1"), Duration::ZERO).await.unwrap();

    let global_gpt = reg.deployments_for_model("gpt-4o", "").await.unwrap();
    assert_eq!(global_gpt.len(), 1);
    assert_eq!(global_gpt[0].deployment_name(), Some("g1"));

    assert_eq!(reg.deployments_for_model("", "").await.unwrap().len(), 2);
    assert_eq!(reg.deployments_for_model("", "t1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ensure_populated_seeds_only_when_empty() {
    let reg = registry();
    let seeded = reg
        .ensure_populated(|| vec![azure("", "gpt-4o", "a"), azure("", "gpt-4o-mini", "b")])
        .await
        .unwrap();
    assert_eq!(seeded.len(), 2);

    let mut called = false;
    let again = reg
        .ensure_populated(|| {
            called = true;
            vec![azure("", "other", "c")]
        })
        .await
        .unwrap();
    assert!(!called);
    assert_eq!(again.len(), 2);
}

#[tokio::test]
async fn test_ensure_populated_duplicate_seeds_overwrite() {
    let reg = registry();
    let all = reg
        .ensure_populated(|| vec![azure("", "gpt-4o", "first"), azure("", "gpt-4o", "second")])
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].deployment_name(), Some("second"));
}
