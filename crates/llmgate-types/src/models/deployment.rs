//! Deployment registry record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Well-known `meta` keys read by the provider adapters.
pub mod meta_keys {
    pub const BASE_URL: &str = "BaseURL";
    pub const DEPLOYMENT: &str = "Deployment";
    pub const API_VERSION: &str = "APIVer";
    pub const ALIAS: &str = "Alias";
    pub const ORGANIZATION: &str = "Organization";
}

/// Model name of a catch-all route used when no exact model matches.
pub const DEFAULT_ROUTE_MODEL: &str = "*";

/// Upstream vendor discriminator.
///
/// Serialized as a plain string so unknown providers written by newer
/// operators survive a read/write cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provider {
    AzureOpenAi,
    OpenAi,
    Other(String),
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Self::AzureOpenAi => "azure-openai",
            Self::OpenAi => "openai",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for Provider {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "azure-openai" | "azureopenai" | "azure" => Self::AzureOpenAi,
            "openai" => Self::OpenAi,
            _ => Self::Other(value),
        }
    }
}

impl From<Provider> for String {
    fn from(value: Provider) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(tenant, model)` → upstream deployment mapping.
///
/// An empty `tenant` is the global scope. Fields this version does not know
/// about are kept in `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDeployment {
    pub model: String,
    #[serde(default)]
    pub deployment: String,
    pub provider: Provider,
    #[serde(default)]
    pub tenant: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ModelDeployment {
    pub fn new(tenant: impl Into<String>, model: impl Into<String>, provider: Provider) -> Self {
        Self {
            model: model.into(),
            deployment: String::new(),
            provider,
            tenant: tenant.into(),
            meta: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str).filter(|v| !v.trim().is_empty())
    }

    /// Azure deployment name: `meta["Deployment"]`, falling back to the
    /// top-level `deployment` field.
    pub fn deployment_name(&self) -> Option<&str> {
        self.meta_value(meta_keys::DEPLOYMENT)
            .or_else(|| Some(self.deployment.as_str()).filter(|d| !d.trim().is_empty()))
    }

    pub fn is_global(&self) -> bool {
        self.tenant.is_empty()
    }

    pub fn is_default_route(&self) -> bool {
        self.model == DEFAULT_ROUTE_MODEL
    }
}
