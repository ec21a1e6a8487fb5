//! Gateway configuration.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

use crate::error::ConfigError;

pub const DEFAULT_BODY_MAX_BYTES: usize = 1 << 20;
pub const DEFAULT_WRITE_DEADLINE_SECS: u64 = 60;
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-07-01-preview";

/// Full gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct GatewayConfig {
    #[serde(default)]
    #[validate(nested)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    #[validate(nested)]
    pub kv: KvConfig,
    #[serde(default)]
    #[validate(nested)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl GatewayConfig {
    /// Run `validator` rules and surface the first failure as a [`ConfigError`].
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate().map_err(|e| ConfigError::from_validation(&e))?;
        if self.kv.backend == KvBackend::Redis && self.kv.redis_addr.trim().is_empty() {
            return Err(ConfigError::Missing { name: "kv.redis-addr".to_string() });
        }
        Ok(())
    }
}

/// Frontend listener and streaming proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ProxyConfig {
    /// Listen address, `:8000` or `host:port`
    #[validate(length(min = 1_u64))]
    pub listen: String,
    /// Request body cap in bytes
    #[validate(range(min = 1_usize))]
    #[serde(default = "default_body_max_bytes")]
    pub body_max_bytes: usize,
    /// Per-chunk write deadline in seconds
    #[validate(range(min = 1_u64, max = 3600_u64))]
    #[serde(default = "default_write_deadline_secs")]
    pub write_deadline_secs: u64,
    /// Expose `/metrics`
    #[serde(default)]
    pub metrics_enabled: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: ":8000".to_string(),
            body_max_bytes: DEFAULT_BODY_MAX_BYTES,
            write_deadline_secs: DEFAULT_WRITE_DEADLINE_SECS,
            metrics_enabled: false,
        }
    }
}

impl ProxyConfig {
    /// Resolve `:port` shorthand to a bindable socket address.
    pub fn socket_addr(&self) -> String {
        match self.listen.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.listen.clone(),
        }
    }
}

const fn default_body_max_bytes() -> usize {
    DEFAULT_BODY_MAX_BYTES
}

const fn default_write_deadline_secs() -> u64 {
    DEFAULT_WRITE_DEADLINE_SECS
}

/// Which KV backend stores the registry and limiter counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KvBackend {
    #[default]
    Memory,
    Redis,
}

impl FromStr for KvBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::UnknownBackend { name: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct KvConfig {
    #[serde(default)]
    pub backend: KvBackend,
    /// `host:port` or a full `redis://` URL
    #[serde(default)]
    pub redis_addr: String,
    #[serde(default)]
    pub redis_password: Option<String>,
    /// Wrap the networked backend in a circuit breaker
    #[serde(default = "default_true")]
    pub circuit_breaker_enabled: bool,
    /// COUNT hint for cursor scans
    #[validate(range(min = 1_usize, max = 10_000_usize))]
    #[serde(default = "default_scan_page_hint")]
    pub scan_page_hint: usize,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            backend: KvBackend::Memory,
            redis_addr: "localhost:6379".to_string(),
            redis_password: None,
            circuit_breaker_enabled: true,
            scan_page_hint: default_scan_page_hint(),
        }
    }
}

impl KvConfig {
    /// Connection URL for the redis client.
    pub fn redis_url(&self) -> String {
        let addr = self.redis_addr.trim();
        if addr.contains("://") {
            return addr.to_string();
        }
        match self.redis_password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!("redis://:{password}@{addr}/"),
            None => format!("redis://{addr}/"),
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_scan_page_hint() -> usize {
    256
}

/// Key authentication and Argon2id parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct AuthConfig {
    /// Accept every request as tenant `default` (local development only)
    #[serde(default)]
    pub disabled: bool,
    #[validate(range(min = 1_u32, max = 16_u32))]
    pub argon2_time: u32,
    #[validate(range(min = 8_u32, max = 4_194_304_u32))]
    pub argon2_memory_kib: u32,
    #[validate(range(min = 1_u32, max = 255_u32))]
    pub argon2_threads: u32,
    #[validate(range(min = 16_u32, max = 64_u32))]
    pub argon2_key_len: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            argon2_time: 1,
            argon2_memory_kib: 64 * 1024,
            argon2_threads: 1,
            argon2_key_len: 32,
        }
    }
}

/// Boot-time Azure routing defaults used to seed an empty registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AzureDefaults {
    pub base_url: String,
    pub api_version: String,
    pub deploy_gpt4o: String,
    pub deploy_gpt4o_mini: String,
    pub deploy_default: String,
    /// Environment variable holding the Azure key
    pub key_env: String,
    /// Host suffix appended to bare resource names
    pub host_suffix: String,
}

impl Default for AzureDefaults {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            deploy_gpt4o: "gpt4o".to_string(),
            deploy_gpt4o_mini: "gpt4o-mini".to_string(),
            deploy_default: String::new(),
            key_env: "AOAI_API_KEY".to_string(),
            host_suffix: "openai.azure.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub azure: AzureDefaults,
    pub openai_key_env: String,
    pub openai_base_url: String,
    #[serde(default)]
    pub openai_organization: Option<String>,
    /// Fallback key when no environment variable resolves
    #[serde(default)]
    pub default_api_key: Option<String>,
    /// Instance selector for multi-upstream routes (`round-robin` or `random`)
    #[serde(default = "default_selector")]
    pub selector: String,
}

fn default_selector() -> String {
    "round-robin".to_string()
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            azure: AzureDefaults::default(),
            openai_key_env: "OPENAI_API_KEY".to_string(),
            openai_base_url: "api.openai.com".to_string(),
            openai_organization: None,
            default_api_key: None,
            selector: default_selector(),
        }
    }
}

/// How request rate limits are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitKind {
    /// Per-minute counters in the KV store, shared by every gateway instance
    #[default]
    FixedWindow,
    /// In-process token buckets
    TokenBucket,
}

impl FromStr for RateLimitKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "" | "fixed-window" | "fixed" => Ok(Self::FixedWindow),
            "token-bucket" | "bucket" => Ok(Self::TokenBucket),
            other => Err(ConfigError::ValidationError {
                field: "limits.kind".to_string(),
                message: format!("unknown rate limit kind {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitsConfig {
    /// Requests per minute per app; 0 disables limiting
    #[serde(default)]
    pub requests_per_minute: u32,
    #[serde(default)]
    pub kind: RateLimitKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(GatewayConfig::default().check().is_ok());
    }

    #[test]
    fn test_zero_body_cap_rejected() {
        let mut config = GatewayConfig::default();
        config.proxy.body_max_bytes = 0;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_socket_addr_shorthand() {
        let proxy = ProxyConfig::default();
        assert_eq!(proxy.socket_addr(), "0.0.0.0:8000");
        let proxy = ProxyConfig { listen: "127.0.0.1:9000".to_string(), ..ProxyConfig::default() };
        assert_eq!(proxy.socket_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("Redis".parse::<KvBackend>(), Ok(KvBackend::Redis));
        assert_eq!("".parse::<KvBackend>(), Ok(KvBackend::Memory));
        assert!("etcd".parse::<KvBackend>().is_err());
    }

    #[test]
    fn test_rate_limit_kind_parse() {
        assert_eq!("token_bucket".parse::<RateLimitKind>(), Ok(RateLimitKind::TokenBucket));
        assert_eq!("Fixed-Window".parse::<RateLimitKind>(), Ok(RateLimitKind::FixedWindow));
        assert!("leaky".parse::<RateLimitKind>().is_err());
    }

    #[test]
    fn test_redis_url() {
        let mut kv = KvConfig { redis_addr: "cache:6379".to_string(), ..KvConfig::default() };
        assert_eq!(kv.redis_url(), "redis://cache:6379/");
        kv.redis_password = Some("pw".to_string());
        assert_eq!(kv.redis_url(), "redis://:pw@cache:6379/");
        kv.redis_addr = "rediss://managed:6380/0".to_string();
        assert_eq!(kv.redis_url(), "rediss://managed:6380/0");
    }
}
