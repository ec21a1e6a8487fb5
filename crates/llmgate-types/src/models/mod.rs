//! Core domain models for the gateway.
//!
//! This module contains the shared data structures stored in the KV registry,
//! the API key contract and the gateway configuration tree.

mod config;
mod deployment;
mod key;
mod policy;

pub use config::{
    AuthConfig, AzureDefaults, GatewayConfig, KvBackend, KvConfig, LimitsConfig, ProvidersConfig,
    ProxyConfig, RateLimitKind, DEFAULT_AZURE_API_VERSION, DEFAULT_BODY_MAX_BYTES,
    DEFAULT_WRITE_DEADLINE_SECS,
};
pub use deployment::{meta_keys, ModelDeployment, Provider, DEFAULT_ROUTE_MODEL};
pub use key::{KeyRecord, KeyStatus};
pub use policy::{AppPolicy, PolicyMap, TokenUsage, DEFAULT_POLICY_APP};
