use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

use llmgate_types::{
    AuthConfig, AzureDefaults, GatewayConfig, KvBackend, KvConfig, LimitsConfig, ProvidersConfig,
    ProxyConfig, RateLimitKind, DEFAULT_AZURE_API_VERSION,
};

#[derive(Debug, Parser)]
#[command(
    name = "llmgate",
    about = "LLM Gateway - OpenAI-compatible reverse proxy for Azure OpenAI and OpenAI",
    version = env!("CARGO_PKG_VERSION"),
    author,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, env = "RUST_LOG", default_value = "info", global = true)]
    pub log_level: String,

    #[command(flatten)]
    pub gateway: GatewayArgs,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Start the proxy server (default if no command specified)")]
    Serve,

    #[command(about = "Issue an API key and print its token and stored record")]
    GenerateKey(GenerateKeyArgs),
}

#[derive(Debug, Args)]
pub struct GenerateKeyArgs {
    #[arg(long, help = "Tenant the key belongs to")]
    pub tenant: String,

    #[arg(long, help = "Application name, used as the rate limit bucket")]
    pub app: String,

    #[arg(long)]
    pub user_id: Option<String>,

    #[arg(long, help = "Days until the key expires")]
    pub expires_in_days: Option<u32>,

    #[arg(long = "meta", value_parser = parse_key_val, help = "Metadata entry as key=value")]
    pub metadata: Vec<(String, String)>,
}

impl GenerateKeyArgs {
    pub fn metadata_map(&self) -> BTreeMap<String, String> {
        self.metadata.iter().cloned().collect()
    }
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

/// Every gateway option; each one can also come from the environment.
#[derive(Debug, Args)]
pub struct GatewayArgs {
    #[arg(
        long,
        env = "PROXY_PORT",
        default_value = ":8000",
        help = "Listen address, :port or host:port"
    )]
    pub listen: String,

    #[arg(long, env = "BODY_MAX_BYTES", default_value_t = llmgate_types::DEFAULT_BODY_MAX_BYTES)]
    pub body_max_bytes: usize,

    #[arg(
        long,
        env = "WRITE_DEADLINE_SECS",
        default_value_t = llmgate_types::DEFAULT_WRITE_DEADLINE_SECS
    )]
    pub write_deadline_secs: u64,

    #[arg(long = "metrics", env = "METRICS_ENABLED", help = "Expose GET /metrics")]
    pub metrics_enabled: bool,

    #[arg(long, env = "KV_BACKEND", default_value = "memory")]
    pub kv_backend: KvBackend,

    #[arg(long, env = "REDIS_ADDR", default_value = "localhost:6379")]
    pub redis_addr: String,

    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    #[arg(
        long = "redis-circuit-breaker",
        env = "REDIS_CIRCUIT_BREAKER_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub redis_circuit_breaker: bool,

    #[arg(long, env = "KV_SCAN_COUNT", default_value_t = 256)]
    pub scan_page_hint: usize,

    #[command(flatten)]
    pub azure: AzureArgs,

    #[arg(long, env = "OPENAI_KEY_ENV", default_value = "OPENAI_API_KEY")]
    pub openai_key_env: String,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "api.openai.com")]
    pub openai_base_url: String,

    #[arg(long, env = "OPENAI_ORGANIZATION")]
    pub openai_organization: Option<String>,

    #[arg(long, env = "DEFAULT_API_KEY", hide_env_values = true)]
    pub default_api_key: Option<String>,

    #[arg(long, env = "LB_SELECTOR", default_value = "round-robin", help = "round-robin or random")]
    pub selector: String,

    #[arg(long, env = "AUTH_DISABLED", help = "Accept every request as tenant 'default'")]
    pub auth_disabled: bool,

    #[arg(long, env = "KEYS_FILE", help = "JSON array of key records to load at startup")]
    pub keys_file: Option<PathBuf>,

    #[arg(long, env = "POLICIES_FILE", help = "JSON object of per-app policies")]
    pub policies_file: Option<PathBuf>,

    #[arg(long = "argon2-t", env = "ARGON2_T", default_value_t = 1)]
    pub argon2_time: u32,

    #[arg(long = "argon2-m-kib", env = "ARGON2_M_KIB", default_value_t = 65_536)]
    pub argon2_memory_kib: u32,

    #[arg(long = "argon2-p", env = "ARGON2_P", default_value_t = 1)]
    pub argon2_threads: u32,

    #[arg(long = "argon2-keylen", env = "ARGON2_KEYLEN", default_value_t = 32)]
    pub argon2_key_len: u32,

    #[arg(
        long = "rate-limit-rpm",
        env = "RATE_LIMIT_RPM",
        default_value_t = 0,
        help = "Requests per minute per app; 0 disables"
    )]
    pub requests_per_minute: u32,

    #[arg(long, env = "RATE_LIMIT_KIND", default_value = "fixed-window")]
    pub rate_limit_kind: RateLimitKind,
}

/// Azure seed defaults used when the registry starts empty.
#[derive(Debug, Args)]
pub struct AzureArgs {
    #[arg(long = "aoai-base-url", env = "AOAI_BASE_URL", default_value = "")]
    pub base_url: String,

    #[arg(
        long = "aoai-api-version",
        env = "AOAI_API_VERSION",
        default_value = DEFAULT_AZURE_API_VERSION
    )]
    pub api_version: String,

    #[arg(long = "aoai-deploy-gpt4o", env = "AOAI_DEPLOY_GPT4O", default_value = "gpt4o")]
    pub deploy_gpt4o: String,

    #[arg(
        long = "aoai-deploy-gpt4o-mini",
        env = "AOAI_DEPLOY_GPT4O_MINI",
        default_value = "gpt4o-mini"
    )]
    pub deploy_gpt4o_mini: String,

    #[arg(long = "aoai-deploy-default", env = "AOAI_DEPLOY_DEFAULT", default_value = "")]
    pub deploy_default: String,

    #[arg(long = "aoai-key-env", env = "AOAI_KEY_ENV", default_value = "AOAI_API_KEY")]
    pub key_env: String,

    #[arg(long = "aoai-host-suffix", env = "AOAI_HOST_SUFFIX", default_value = "openai.azure.com")]
    pub host_suffix: String,
}

impl GatewayArgs {
    pub fn to_config(&self) -> GatewayConfig {
        GatewayConfig {
            proxy: ProxyConfig {
                listen: self.listen.clone(),
                body_max_bytes: self.body_max_bytes,
                write_deadline_secs: self.write_deadline_secs,
                metrics_enabled: self.metrics_enabled,
            },
            kv: KvConfig {
                backend: self.kv_backend,
                redis_addr: self.redis_addr.clone(),
                redis_password: self.redis_password.clone(),
                circuit_breaker_enabled: self.redis_circuit_breaker,
                scan_page_hint: self.scan_page_hint,
            },
            auth: AuthConfig {
                disabled: self.auth_disabled,
                argon2_time: self.argon2_time,
                argon2_memory_kib: self.argon2_memory_kib,
                argon2_threads: self.argon2_threads,
                argon2_key_len: self.argon2_key_len,
            },
            providers: ProvidersConfig {
                azure: AzureDefaults {
                    base_url: self.azure.base_url.clone(),
                    api_version: self.azure.api_version.clone(),
                    deploy_gpt4o: self.azure.deploy_gpt4o.clone(),
                    deploy_gpt4o_mini: self.azure.deploy_gpt4o_mini.clone(),
                    deploy_default: self.azure.deploy_default.clone(),
                    key_env: self.azure.key_env.clone(),
                    host_suffix: self.azure.host_suffix.clone(),
                },
                openai_key_env: self.openai_key_env.clone(),
                openai_base_url: self.openai_base_url.clone(),
                openai_organization: self.openai_organization.clone().filter(|o| !o.is_empty()),
                default_api_key: self.default_api_key.clone().filter(|k| !k.is_empty()),
                selector: self.selector.clone(),
            },
            limits: LimitsConfig {
                requests_per_minute: self.requests_per_minute,
                kind: self.rate_limit_kind,
            },
        }
    }
}
