//! Provider adapters: rewrite an OpenAI-shaped request into a vendor's
//! upstream form.
//!
//! An adapter owns a public path prefix (`/azure/openai`, `/openai`) and a
//! routing table built from registry deployments. [`Adapter::rewrite`] sets
//! the upstream URL and `Host`, strips the caller's credential and installs
//! the upstream one.

mod azure;
mod common;
mod openai;

pub use azure::{AzureAdapter, AzureEntry, AZURE_PREFIX};
pub use common::{
    copy_query, ensure_absolute_base, force_content_length, join_url, provider_name,
    rewrite_json_field, set_api_key, set_upstream_url, strip_caller_auth, KeySource, RouteTable,
    TenantLookup,
};
pub use openai::{OpenAiAdapter, OpenAiInstance, OPENAI_PREFIX};

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use llmgate_types::{ConfigError, ModelDeployment, ProvidersConfig};
use tracing::info;

use crate::error::AppResult;
use crate::loadbalancing::{selector_by_name, Selector};
use crate::registry::{default_seed, ModelRegistry};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("unknown model {model:?} and no default route")]
    UnknownModel { model: String },

    #[error("{provider} route incomplete for model {model:?}")]
    RouteIncomplete { provider: String, model: String },

    #[error("invalid base url {base:?}: {reason}")]
    InvalidBase { base: String, reason: String },

    #[error("unsupported path {path:?}")]
    UnsupportedPath { path: String },

    #[error("invalid value for header {name}")]
    InvalidHeader { name: String },
}

/// Per-request routing descriptor, immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: Method,
    /// `/v1/...` suffix after the provider prefix
    pub path: String,
    pub query: String,
    pub model: String,
    pub tenant: String,
    pub app: String,
    pub user_id: String,
}

/// Outgoing request as the adapter sees it.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamRequest {
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: Bytes) -> Self {
        Self { method, url, headers, body }
    }
}

pub trait Adapter: Send + Sync + fmt::Debug {
    /// Public path prefix served by this adapter, e.g. `/azure/openai`.
    fn prefix(&self) -> &str;

    /// Metrics label derived from the prefix (`/azure/openai` → `azureopenai`).
    fn name(&self) -> String {
        provider_name(self.prefix())
    }

    fn rewrite(
        &self,
        req: &mut UpstreamRequest,
        suffix: &str,
        info: &RequestInfo,
    ) -> Result<(), ProviderError>;
}

/// Adapters for every provider with at least one deployment in `deployments`.
///
/// The OpenAI adapter is always present: with no registry entries it forwards
/// to the configured base URL and key.
pub fn build_adapters(
    deployments: &[ModelDeployment],
    providers: &ProvidersConfig,
    selector: Arc<dyn Selector>,
) -> Result<Vec<Arc<dyn Adapter>>, ProviderError> {
    let mut adapters: Vec<Arc<dyn Adapter>> = Vec::new();

    let azure_keys = KeySource::from_env(&providers.azure.key_env)
        .with_fallback(providers.default_api_key.clone());
    if let Some(azure) = AzureAdapter::from_deployments(
        deployments,
        Arc::clone(&selector),
        azure_keys,
        &providers.azure.host_suffix,
    )? {
        adapters.push(Arc::new(azure));
    }

    let openai_keys = KeySource::from_env(&providers.openai_key_env)
        .with_fallback(providers.default_api_key.clone());
    let openai = OpenAiAdapter::from_deployments(deployments, selector, openai_keys)?
        .with_base_url(&providers.openai_base_url)?
        .with_organization(providers.openai_organization.clone());
    adapters.push(Arc::new(openai));

    Ok(adapters)
}

/// Boot-time adapter snapshot: seed an empty registry from `providers`, then
/// build adapters from every record it holds.
///
/// Registry changes after this call are not seen until the next start.
pub async fn adapters_from_registry(
    registry: &ModelRegistry,
    providers: &ProvidersConfig,
) -> AppResult<Vec<Arc<dyn Adapter>>> {
    let selector = selector_by_name(&providers.selector).ok_or_else(|| {
        ConfigError::ValidationError {
            field: "providers.selector".to_string(),
            message: format!("unknown selector {:?}", providers.selector),
        }
    })?;
    let deployments = registry.ensure_populated(|| default_seed(providers)).await?;
    let adapters = build_adapters(&deployments, providers, selector)?;
    for adapter in &adapters {
        info!(prefix = adapter.prefix(), provider = %adapter.name(), "Provider adapter ready");
    }
    Ok(adapters)
}
