//! Deployment registry: a typed view over the KV store.
//!
//! Records live under `modelreg:{tenant}:{model}` as JSON. An empty tenant is
//! the global scope. Every write goes through [`ModelRegistry::add`], so the
//! canonical key is the only way a record reaches the store.

mod seed;

#[cfg(test)]
mod tests;

pub use seed::default_seed;

use llmgate_types::ModelDeployment;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::kv::{Keyspace, KvError, KvStore, DEFAULT_PAGE_HINT};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("registry store error: {0}")]
    Kv(#[from] KvError),

    #[error("registry record {key} is not valid JSON: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    store: Arc<dyn KvStore>,
    keyspace: Keyspace,
    page_hint: usize,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store, keyspace: Keyspace::model_registry(), page_hint: DEFAULT_PAGE_HINT }
    }

    pub fn with_page_hint(mut self, page_hint: usize) -> Self {
        self.page_hint = page_hint.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Canonical key for `(tenant, model)`.
    pub fn key(&self, tenant: &str, model: &str) -> String {
        self.keyspace.key(&[tenant, model])
    }

    /// Pattern matching every record.
    pub fn pattern_all(&self) -> String {
        self.keyspace.pattern_all()
    }

    /// Pattern matching every record of `tenant`.
    pub fn pattern_for_tenant(&self, tenant: &str) -> String {
        self.keyspace.pattern_under(&[tenant])
    }

    /// Store `record` under its canonical key. A zero `ttl` never expires.
    pub async fn add(&self, record: &ModelDeployment, ttl: Duration) -> RegistryResult<()> {
        let key = self.key(&record.tenant, &record.model);
        let value = serde_json::to_string(record)
            .map_err(|source| RegistryError::Json { key: key.clone(), source })?;
        self.store.set(&key, &value, ttl).await?;
        debug!(key = %key, provider = %record.provider, "Registry record written");
        Ok(())
    }

    /// Same as [`add`](Self::add); records are replaced whole.
    pub async fn update(&self, record: &ModelDeployment, ttl: Duration) -> RegistryResult<()> {
        self.add(record, ttl).await
    }

    pub async fn remove(&self, tenant: &str, model: &str) -> RegistryResult<()> {
        self.store.del(&self.key(tenant, model)).await?;
        Ok(())
    }

    pub async fn get(&self, tenant: &str, model: &str) -> RegistryResult<Option<ModelDeployment>> {
        let key = self.key(tenant, model);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw).map(Some).map_err(|source| RegistryError::Json { key, source })
    }

    /// Every record whose key matches `pattern`, in key order.
    ///
    /// Records that fail to decode are skipped and counted in
    /// `llmgate_registry_invalid_records_total`.
    pub async fn all(&self, pattern: &str) -> RegistryResult<Vec<ModelDeployment>> {
        let entries = self.store.scan_get_all(pattern, self.page_hint).await?;
        let mut records = Vec::with_capacity(entries.len());
        for (key, raw) in entries {
            match serde_json::from_str::<ModelDeployment>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping invalid registry record");
                    counter!("llmgate_registry_invalid_records_total").increment(1);
                },
            }
        }
        Ok(records)
    }

    pub async fn all_global(&self) -> RegistryResult<Vec<ModelDeployment>> {
        let records = self.all(&self.pattern_for_tenant("")).await?;
        Ok(records.into_iter().filter(ModelDeployment::is_global).collect())
    }

    pub async fn all_for_tenant(&self, tenant: &str) -> RegistryResult<Vec<ModelDeployment>> {
        let records = self.all(&self.pattern_for_tenant(tenant)).await?;
        Ok(records.into_iter().filter(|r| r.tenant == tenant).collect())
    }

    /// Deployments serving `model` for `tenant`.
    ///
    /// With both set this is a point lookup that falls back to the global
    /// record. An empty `tenant` scopes to global records; an empty `model`
    /// returns every model in scope.
    pub async fn deployments_for_model(
        &self,
        model: &str,
        tenant: &str,
    ) -> RegistryResult<Vec<ModelDeployment>> {
        if !model.is_empty() && !tenant.is_empty() {
            if let Some(record) = self.get(tenant, model).await? {
                return Ok(vec![record]);
            }
            return Ok(self.get("", model).await?.into_iter().collect());
        }

        let in_scope = if tenant.is_empty() {
            self.all_global().await?
        } else {
            self.all_for_tenant(tenant).await?
        };
        Ok(in_scope.into_iter().filter(|r| model.is_empty() || r.model == model).collect())
    }

    /// Seed an empty registry and return every record it then holds.
    ///
    /// Nothing is written when at least one record already exists. Seeds are
    /// stored without expiry; a seed that cannot be written is logged and
    /// skipped.
    pub async fn ensure_populated<F>(&self, seed: F) -> RegistryResult<Vec<ModelDeployment>>
    where
        F: FnOnce() -> Vec<ModelDeployment>,
    {
        let existing = self.all(&self.pattern_all()).await?;
        if !existing.is_empty() {
            info!(count = existing.len(), "Loaded {} active models from registry", existing.len());
            return Ok(existing);
        }

        let seeds = seed();
        for record in &seeds {
            if let Err(e) = self.add(record, Duration::ZERO).await {
                warn!(
                    tenant = %record.tenant,
                    model = %record.model,
                    error = %e,
                    "Failed to seed registry record"
                );
            }
        }

        let all = self.all(&self.pattern_all()).await?;
        info!(
            count = all.len(),
            seeded = seeds.len(),
            "Loaded {} active models from registry",
            all.len()
        );
        Ok(all)
    }
}
