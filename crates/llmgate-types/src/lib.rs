//! # LLM Gateway Types
//!
//! Core types, configuration, and error definitions for the LLM gateway.
//!
//! - **`error`** - Typed error hierarchy for proxy and configuration failures
//! - **`models`** - Domain models (deployments, API keys, app policies, gateway config)
//!
//! ## Architecture Role
//!
//! `llmgate-types` sits at the bottom of the dependency graph:
//!
//! ```text
//!        llmgate-types (this crate)
//!                │
//!                ▼
//!          llmgate-core
//!                │
//!                ▼
//!         llmgate-server
//! ```
//!
//! Everything here is serde-serializable so the same shapes can be stored in
//! the KV registry, read from config, and rendered in problem responses.

pub mod error;
pub mod models;

pub use error::{ConfigError, ProxyError, Result, TypedError};

pub use models::{
    meta_keys, AppPolicy, AuthConfig, AzureDefaults, GatewayConfig, KeyRecord, KeyStatus,
    KvBackend, KvConfig, LimitsConfig, ModelDeployment, PolicyMap, Provider, ProvidersConfig,
    ProxyConfig, RateLimitKind, TokenUsage, DEFAULT_AZURE_API_VERSION, DEFAULT_BODY_MAX_BYTES,
    DEFAULT_POLICY_APP, DEFAULT_ROUTE_MODEL, DEFAULT_WRITE_DEADLINE_SECS,
};
