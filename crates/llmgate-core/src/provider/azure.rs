//! Azure OpenAI adapter.
//!
//! `/azure/openai/v1/chat/completions` becomes
//! `https://{resource}.openai.azure.com/openai/deployments/{deployment}/chat/completions`
//! with `api-version` appended to the query and the key in an `api-key` header.

use llmgate_types::{meta_keys, ModelDeployment, Provider};
use std::sync::Arc;
use tracing::{debug, warn};

use super::common::{
    copy_query, ensure_absolute_base, join_url, set_api_key, set_upstream_url, split_list,
    strip_caller_auth, KeySource, RouteTable,
};
use super::{Adapter, ProviderError, RequestInfo, UpstreamRequest};
use crate::loadbalancing::{RoundRobinSelector, Selector};

pub const AZURE_PREFIX: &str = "/azure/openai";

const DEFAULT_KEY_ENV: &str = "AOAI_API_KEY";
const DEFAULT_HOST_SUFFIX: &str = "openai.azure.com";
const API_KEY_HEADER: &str = "api-key";
const DEFAULT_ROUTE: &str = llmgate_types::DEFAULT_ROUTE_MODEL;

/// One routable Azure deployment. All three fields must be set for a request
/// to be forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureEntry {
    pub base_url: String,
    pub deployment: String,
    pub api_version: String,
}

impl AzureEntry {
    pub fn new(
        base_url: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            deployment: deployment.into(),
            api_version: api_version.into(),
        }
    }

    fn is_complete(&self) -> bool {
        ![&self.base_url, &self.deployment, &self.api_version].iter().any(|v| v.trim().is_empty())
    }
}

#[derive(Debug)]
pub struct AzureAdapter {
    routes: RouteTable<AzureEntry>,
    default: Vec<AzureEntry>,
    keys: KeySource,
    host_suffix: String,
    selector: Arc<dyn Selector>,
}

impl Default for AzureAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AzureAdapter {
    pub fn new() -> Self {
        Self {
            routes: RouteTable::default(),
            default: Vec::new(),
            keys: KeySource::from_env(DEFAULT_KEY_ENV),
            host_suffix: DEFAULT_HOST_SUFFIX.to_string(),
            selector: Arc::new(RoundRobinSelector::new()),
        }
    }

    pub fn with_global(mut self, model: &str, entry: AzureEntry) -> Self {
        self.routes.insert("", model, entry);
        self
    }

    pub fn with_tenant(mut self, tenant: &str, model: &str, entry: AzureEntry) -> Self {
        self.routes.insert(tenant, model, entry);
        self
    }

    /// Final fallback for any model.
    pub fn with_default(mut self, entry: AzureEntry) -> Self {
        self.default.push(entry);
        self
    }

    pub fn with_keys(mut self, keys: KeySource) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn Selector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_host_suffix(mut self, suffix: &str) -> Self {
        if !suffix.trim().is_empty() {
            self.host_suffix = suffix.trim().to_string();
        }
        self
    }

    /// Build from registry records. Returns `None` when no Azure deployment
    /// is present.
    ///
    /// `BaseURL` and `Deployment` may hold comma-separated lists; they are
    /// paired by position and a single value is reused for every position.
    /// A global record for the catch-all model becomes the default route.
    pub fn from_deployments(
        deployments: &[ModelDeployment],
        selector: Arc<dyn Selector>,
        keys: KeySource,
        host_suffix: &str,
    ) -> Result<Option<Self>, ProviderError> {
        let mut adapter =
            Self::new().with_selector(selector).with_keys(keys).with_host_suffix(host_suffix);
        let mut count = 0_usize;

        for record in deployments.iter().filter(|r| r.provider == Provider::AzureOpenAi) {
            for entry in adapter.entries_for(record)? {
                if record.is_default_route() && record.is_global() {
                    adapter.default.push(entry);
                } else {
                    adapter.routes.insert(&record.tenant, &record.model, entry);
                }
                count += 1;
            }
        }

        if count == 0 {
            return Ok(None);
        }
        debug!(entries = count, "Built Azure OpenAI routing table");
        Ok(Some(adapter))
    }

    fn entries_for(&self, record: &ModelDeployment) -> Result<Vec<AzureEntry>, ProviderError> {
        let bases = split_list(record.meta_value(meta_keys::BASE_URL).unwrap_or_default());
        let deployments = split_list(record.deployment_name().unwrap_or_default());
        let api_version = record.meta_value(meta_keys::API_VERSION).unwrap_or_default().trim();

        let bases = bases
            .iter()
            .map(|b| {
                let base = ensure_absolute_base(b, &self.host_suffix)?;
                join_url(&base, &[], &[]).map(|_| base)
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;

        let width = match (bases.len(), deployments.len()) {
            (b, d) if b > 1 && d > 1 => {
                if b != d {
                    warn!(
                        tenant = %record.tenant,
                        model = %record.model,
                        bases = b,
                        deployments = d,
                        "BaseURL and Deployment lists differ in length; extra values ignored"
                    );
                }
                b.min(d)
            },
            (b, d) => b.max(d).max(1),
        };

        let pick = |list: &[String], i: usize| -> String {
            match list {
                [] => String::new(),
                [only] => only.clone(),
                many => many.get(i).cloned().unwrap_or_default(),
            }
        };
        Ok((0..width)
            .map(|i| AzureEntry::new(pick(&bases, i), pick(&deployments, i), api_version))
            .collect())
    }

    /// Tenant entry, global entry, sole global entry, tenant default, default.
    fn resolve(&self, tenant: &str, model: &str) -> Option<&[AzureEntry]> {
        self.routes
            .lookup(tenant, model)
            .or_else(|| self.routes.single_global())
            .or_else(|| self.routes.tenant(tenant, DEFAULT_ROUTE))
            .or_else(|| Some(self.default.as_slice()).filter(|d| !d.is_empty()))
    }
}

impl Adapter for AzureAdapter {
    fn prefix(&self) -> &str {
        AZURE_PREFIX
    }

    fn rewrite(
        &self,
        req: &mut UpstreamRequest,
        suffix: &str,
        info: &RequestInfo,
    ) -> Result<(), ProviderError> {
        let unknown = || ProviderError::UnknownModel { model: info.model.clone() };
        let instances = self.resolve(&info.tenant, &info.model).ok_or_else(unknown)?;
        let entry = self.selector.select(instances, &info.model).ok_or_else(unknown)?;

        if !entry.is_complete() {
            return Err(ProviderError::RouteIncomplete {
                provider: "aoai".to_string(),
                model: info.model.clone(),
            });
        }
        let Some(rest) = suffix.strip_prefix("/v1/") else {
            return Err(ProviderError::UnsupportedPath { path: suffix.to_string() });
        };

        let base = ensure_absolute_base(&entry.base_url, &self.host_suffix)?;
        let mut query: Vec<(String, String)> =
            copy_query(req).into_iter().filter(|(k, _)| k != "api-version").collect();
        query.push(("api-version".to_string(), entry.api_version.clone()));
        let url = join_url(&base, &["openai", "deployments", &entry.deployment, rest], &query)?;

        debug!(
            tenant = %info.tenant,
            model = %info.model,
            deployment = %entry.deployment,
            host = url.host_str().unwrap_or_default(),
            "Azure OpenAI route resolved"
        );
        set_upstream_url(req, url);

        strip_caller_auth(&mut req.headers);
        let key = self.keys.resolve(&info.tenant, DEFAULT_KEY_ENV).unwrap_or_default();
        set_api_key(&mut req.headers, API_KEY_HEADER, &key)
    }
}
