//! Boot seed for an empty registry.

use llmgate_types::{meta_keys, ModelDeployment, Provider, ProvidersConfig, DEFAULT_ROUTE_MODEL};
use tracing::warn;

fn azure_record(
    model: &str,
    base_url: &str,
    deployment: &str,
    api_version: &str,
) -> ModelDeployment {
    let mut record = ModelDeployment::new("", model, Provider::AzureOpenAi)
        .with_meta(meta_keys::BASE_URL, base_url)
        .with_meta(meta_keys::DEPLOYMENT, deployment)
        .with_meta(meta_keys::API_VERSION, api_version);
    record.deployment = deployment.to_string();
    record
}

/// Global Azure routes for `gpt-4o` and `gpt-4o-mini`, plus a catch-all
/// route when a default deployment is configured.
///
/// Returns nothing when no Azure base URL is set.
pub fn default_seed(providers: &ProvidersConfig) -> Vec<ModelDeployment> {
    let azure = &providers.azure;
    let base = azure.base_url.trim();
    if base.is_empty() {
        warn!("No Azure base URL configured; registry seed is empty");
        return Vec::new();
    }

    let routes = [
        ("gpt-4o", azure.deploy_gpt4o.trim()),
        ("gpt-4o-mini", azure.deploy_gpt4o_mini.trim()),
        (DEFAULT_ROUTE_MODEL, azure.deploy_default.trim()),
    ];
    routes
        .into_iter()
        .filter(|(_, deployment)| !deployment.is_empty())
        .map(|(model, deployment)| azure_record(model, base, deployment, &azure.api_version))
        .collect()
}
