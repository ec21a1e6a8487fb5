//! Helpers shared by every adapter: base URL normalisation, URL joining,
//! header surgery and best-effort JSON body rewrites.

use axum::http::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

use super::{ProviderError, UpstreamRequest};

/// Normalise a configured base into an absolute `https://` URL.
///
/// Absolute URLs are kept; a dotted host gets `https://`; a bare resource
/// name gets `https://{name}.{default_host_suffix}`.
pub fn ensure_absolute_base(
    base: &str,
    default_host_suffix: &str,
) -> Result<String, ProviderError> {
    let trimmed = base.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ProviderError::InvalidBase {
            base: base.to_string(),
            reason: "empty base".to_string(),
        });
    }
    if trimmed.contains("://") {
        return Ok(trimmed.to_string());
    }
    if trimmed.contains('.') {
        return Ok(format!("https://{trimmed}"));
    }
    let suffix = default_host_suffix.trim().trim_start_matches('.');
    if suffix.is_empty() {
        return Ok(format!("https://{trimmed}"));
    }
    Ok(format!("https://{trimmed}.{suffix}"))
}

/// Append `segments` to the path of `base` and merge `query` into its query.
///
/// Segments may contain `/`; empty pieces are skipped so no `//` is produced.
/// Query pairs are added after any pairs already on `base`.
pub fn join_url(
    base: &str,
    segments: &[&str],
    query: &[(String, String)],
) -> Result<Url, ProviderError> {
    let mut url = Url::parse(base).map_err(|e| ProviderError::InvalidBase {
        base: base.to_string(),
        reason: e.to_string(),
    })?;
    {
        let mut path = url.path_segments_mut().map_err(|()| ProviderError::InvalidBase {
            base: base.to_string(),
            reason: "base cannot carry a path".to_string(),
        })?;
        path.pop_if_empty();
        for piece in segments.iter().flat_map(|s| s.split('/')) {
            match piece {
                "" | "." => {},
                ".." => {
                    path.pop();
                },
                _ => {
                    path.push(piece);
                },
            }
        }
    }
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    Ok(url)
}

/// Point the request at `url` and align the `Host` header.
pub fn set_upstream_url(req: &mut UpstreamRequest, url: Url) {
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => Some(format!("{host}:{port}")),
        (Some(host), None) => Some(host.to_string()),
        (None, _) => None,
    };
    match host.and_then(|h| HeaderValue::from_str(&h).ok()) {
        Some(value) => {
            req.headers.insert(HOST, value);
        },
        None => {
            req.headers.remove(HOST);
        },
    }
    req.url = url;
}

/// Query pairs of the request URL, repeated keys kept in order.
pub fn copy_query(req: &UpstreamRequest) -> Vec<(String, String)> {
    req.url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect()
}

/// Remove every credential the caller presented to the gateway.
pub fn strip_caller_auth(headers: &mut HeaderMap) {
    headers.remove(AUTHORIZATION);
    headers.remove("x-api-key");
}

/// Set `name: value`; an empty value leaves the headers untouched.
pub fn set_api_key(
    headers: &mut HeaderMap,
    name: &'static str,
    value: &str,
) -> Result<(), ProviderError> {
    if value.is_empty() {
        return Ok(());
    }
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| ProviderError::InvalidHeader { name: name.to_string() })?;
    header.set_sensitive(true);
    headers.insert(HeaderName::from_static(name), header);
    Ok(())
}

/// Declare an exact body length and drop framing/encoding headers that no
/// longer describe the body.
pub fn force_content_length(req: &mut UpstreamRequest, len: usize) {
    req.headers.remove(TRANSFER_ENCODING);
    req.headers.remove(CONTENT_ENCODING);
    req.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
}

/// Replace a top-level field of a JSON object body.
///
/// Returns `false` and leaves the body untouched when it is not a JSON
/// object.
pub fn rewrite_json_field(req: &mut UpstreamRequest, field: &str, value: Value) -> bool {
    let Ok(Value::Object(mut object)) = serde_json::from_slice::<Value>(&req.body) else {
        return false;
    };
    object.insert(field.to_string(), value);
    let Ok(updated) = serde_json::to_vec(&object) else {
        return false;
    };
    let len = updated.len();
    req.body = Bytes::from(updated);
    force_content_length(req, len);
    true
}

/// `/azure/openai` → `azureopenai`; an empty prefix is `unknown`.
pub fn provider_name(prefix: &str) -> String {
    let name: String = prefix.split('/').filter(|s| !s.is_empty()).collect();
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name
    }
}

/// Lowercased, trimmed routing key for a model name.
pub(crate) fn model_key(model: &str) -> String {
    model.trim().to_lowercase()
}

/// Comma-separated list from a meta value; blanks dropped.
pub(crate) fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

pub type TenantLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Where an adapter finds the upstream credential.
///
/// Resolution: per-tenant lookup, then `env_var` (or the adapter's default
/// variable when blank), then the configured fallback.
#[derive(Clone)]
pub struct KeySource {
    /// `None` skips the environment entirely
    env_var: Option<String>,
    per_tenant: Option<TenantLookup>,
    fallback: Option<String>,
}

impl Default for KeySource {
    fn default() -> Self {
        Self { env_var: Some(String::new()), per_tenant: None, fallback: None }
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySource")
            .field("env_var", &self.env_var)
            .field("per_tenant", &self.per_tenant.is_some())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl KeySource {
    pub fn from_env(env_var: &str) -> Self {
        Self { env_var: Some(env_var.trim().to_string()), ..Self::default() }
    }

    /// A constant key; the environment is not consulted.
    pub fn fixed(key: impl Into<String>) -> Self {
        Self { env_var: None, per_tenant: None, fallback: Some(key.into()) }
    }

    pub fn with_per_tenant(mut self, lookup: TenantLookup) -> Self {
        self.per_tenant = Some(lookup);
        self
    }

    pub fn with_fallback(mut self, key: Option<String>) -> Self {
        self.fallback = key.filter(|k| !k.trim().is_empty());
        self
    }

    /// The key for `tenant`, or `None` when nothing resolves.
    pub fn resolve(&self, tenant: &str, default_env: &str) -> Option<String> {
        let per_tenant = self.per_tenant.as_ref().and_then(|lookup| lookup(tenant));
        if let Some(key) = non_blank(per_tenant) {
            return Some(key);
        }
        if let Some(env_var) = &self.env_var {
            let name = if env_var.is_empty() { default_env } else { env_var.as_str() };
            if let Some(key) = non_blank(std::env::var(name).ok()) {
                return Some(key);
            }
        }
        self.fallback.clone()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Two-level routing table: tenant overrides on top of a global map.
///
/// Model keys are stored lowercased and trimmed.
#[derive(Debug, Clone)]
pub struct RouteTable<T> {
    global: HashMap<String, Vec<T>>,
    by_tenant: HashMap<String, HashMap<String, Vec<T>>>,
}

impl<T> Default for RouteTable<T> {
    fn default() -> Self {
        Self { global: HashMap::new(), by_tenant: HashMap::new() }
    }
}

impl<T> RouteTable<T> {
    /// Append an instance for `(tenant, model)`; an empty tenant is global.
    pub fn insert(&mut self, tenant: &str, model: &str, instance: T) {
        let key = model_key(model);
        let slot = if tenant.is_empty() {
            self.global.entry(key).or_default()
        } else {
            self.by_tenant.entry(tenant.to_string()).or_default().entry(key).or_default()
        };
        slot.push(instance);
    }

    pub fn tenant(&self, tenant: &str, model: &str) -> Option<&[T]> {
        if tenant.is_empty() {
            return None;
        }
        self.by_tenant
            .get(tenant)
            .and_then(|models| models.get(&model_key(model)))
            .map(Vec::as_slice)
            .filter(|list| !list.is_empty())
    }

    pub fn global(&self, model: &str) -> Option<&[T]> {
        self.global.get(&model_key(model)).map(Vec::as_slice).filter(|list| !list.is_empty())
    }

    /// Tenant entry first, then the global one.
    pub fn lookup(&self, tenant: &str, model: &str) -> Option<&[T]> {
        self.tenant(tenant, model).or_else(|| self.global(model))
    }

    /// The global entry when exactly one global model is routed.
    pub fn single_global(&self) -> Option<&[T]> {
        if self.global.len() != 1 {
            return None;
        }
        self.global.values().next().map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.by_tenant.values().all(HashMap::is_empty)
    }
}
