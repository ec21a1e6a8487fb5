//! OpenAI adapter. The `/v1/...` suffix is forwarded unchanged.

use llmgate_types::{meta_keys, ModelDeployment, Provider};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::common::{
    copy_query, ensure_absolute_base, join_url, model_key, rewrite_json_field, set_api_key,
    set_upstream_url, strip_caller_auth, KeySource, RouteTable, TenantLookup,
};
use super::{Adapter, ProviderError, RequestInfo, UpstreamRequest};
use crate::loadbalancing::{RoundRobinSelector, Selector};

pub const OPENAI_PREFIX: &str = "/openai";

const DEFAULT_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_HOST: &str = "api.openai.com";
const ORGANIZATION_HEADER: &str = "openai-organization";

/// Per-model upstream override from a registry record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenAiInstance {
    /// Absolute base URL; empty uses the adapter's base
    pub base_url: String,
    pub alias: Option<String>,
    pub organization: Option<String>,
}

pub struct OpenAiAdapter {
    base_url: String,
    keys: KeySource,
    instances: RouteTable<OpenAiInstance>,
    aliases: HashMap<String, String>,
    organization: Option<String>,
    org_for: Option<TenantLookup>,
    selector: Arc<dyn Selector>,
}

impl fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("base_url", &self.base_url)
            .field("keys", &self.keys)
            .field("instances", &self.instances)
            .field("aliases", &self.aliases)
            .field("organization", &self.organization)
            .field("org_for", &self.org_for.is_some())
            .field("selector", &self.selector)
            .finish()
    }
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self {
            base_url: format!("https://{DEFAULT_HOST}"),
            keys: KeySource::from_env(DEFAULT_KEY_ENV),
            instances: RouteTable::default(),
            aliases: HashMap::new(),
            organization: None,
            org_for: None,
            selector: Arc::new(RoundRobinSelector::new()),
        }
    }

    /// Normalise and set the default upstream base.
    pub fn with_base_url(mut self, base: &str) -> Result<Self, ProviderError> {
        if base.trim().is_empty() {
            return Ok(self);
        }
        let base = ensure_absolute_base(base, DEFAULT_HOST)?;
        join_url(&base, &[], &[])?;
        self.base_url = base;
        Ok(self)
    }

    pub fn with_keys(mut self, keys: KeySource) -> Self {
        self.keys = keys;
        self
    }

    /// Logical → vendor model id; matched case-insensitively.
    pub fn with_alias(mut self, model: &str, vendor_model: &str) -> Self {
        self.aliases.insert(model_key(model), vendor_model.trim().to_string());
        self
    }

    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization.filter(|o| !o.trim().is_empty());
        self
    }

    /// Per-tenant `OpenAI-Organization` resolver; wins over static values.
    pub fn with_org_resolver(mut self, lookup: TenantLookup) -> Self {
        self.org_for = Some(lookup);
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn Selector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_instance(mut self, tenant: &str, model: &str, instance: OpenAiInstance) -> Self {
        self.instances.insert(tenant, model, instance);
        self
    }

    /// Build from registry records. Records without a `BaseURL` use the
    /// adapter base; `Alias` and `Organization` meta apply per instance.
    pub fn from_deployments(
        deployments: &[ModelDeployment],
        selector: Arc<dyn Selector>,
        keys: KeySource,
    ) -> Result<Self, ProviderError> {
        let mut adapter = Self::new().with_selector(selector).with_keys(keys);
        for record in deployments.iter().filter(|r| r.provider == Provider::OpenAi) {
            let base_url = match record.meta_value(meta_keys::BASE_URL) {
                Some(base) => {
                    let base = ensure_absolute_base(base, DEFAULT_HOST)?;
                    join_url(&base, &[], &[])?;
                    base
                },
                None => String::new(),
            };
            let instance = OpenAiInstance {
                base_url,
                alias: record.meta_value(meta_keys::ALIAS).map(str::to_string),
                organization: record.meta_value(meta_keys::ORGANIZATION).map(str::to_string),
            };
            adapter.instances.insert(&record.tenant, &record.model, instance);
        }
        Ok(adapter)
    }

    fn alias_for<'a>(
        &'a self,
        instance: Option<&'a OpenAiInstance>,
        model: &str,
    ) -> Option<&'a str> {
        instance
            .and_then(|i| i.alias.as_deref())
            .or_else(|| self.aliases.get(&model_key(model)).map(String::as_str))
            .filter(|alias| !alias.is_empty() && *alias != model)
    }

    fn organization_for(&self, instance: Option<&OpenAiInstance>, tenant: &str) -> Option<String> {
        self.org_for
            .as_ref()
            .and_then(|lookup| lookup(tenant))
            .map(|org| org.trim().to_string())
            .filter(|org| !org.is_empty())
            .or_else(|| instance.and_then(|i| i.organization.clone()))
            .or_else(|| self.organization.clone())
    }
}

impl Adapter for OpenAiAdapter {
    fn prefix(&self) -> &str {
        OPENAI_PREFIX
    }

    fn rewrite(
        &self,
        req: &mut UpstreamRequest,
        suffix: &str,
        info: &RequestInfo,
    ) -> Result<(), ProviderError> {
        let instance = self
            .instances
            .lookup(&info.tenant, &info.model)
            .and_then(|list| self.selector.select(list, &info.model));

        let base = instance
            .map(|i| i.base_url.as_str())
            .filter(|b| !b.is_empty())
            .unwrap_or(self.base_url.as_str());
        let url = join_url(base, &[suffix], &copy_query(req))?;
        set_upstream_url(req, url);

        strip_caller_auth(&mut req.headers);
        req.headers.remove("api-key");
        if let Some(key) = self.keys.resolve(&info.tenant, DEFAULT_KEY_ENV) {
            set_api_key(&mut req.headers, "authorization", &format!("Bearer {key}"))?;
        }
        if let Some(org) = self.organization_for(instance, &info.tenant) {
            set_api_key(&mut req.headers, ORGANIZATION_HEADER, &org)?;
        }

        if let Some(alias) = self.alias_for(instance, &info.model) {
            let rewritten = rewrite_json_field(req, "model", Value::String(alias.to_string()));
            debug!(model = %info.model, alias = %alias, rewritten, "OpenAI model alias applied");
        }
        Ok(())
    }
}
