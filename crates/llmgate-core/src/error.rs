//! Unified error types for the gateway core.

use serde::Serialize;
use thiserror::Error;

use crate::auth::{AuthError, HashError, KeyStoreError};
use crate::kv::KvError;
use crate::provider::ProviderError;
use crate::registry::RegistryError;

/// Main error type for start-up and administrative operations.
///
/// Request-path failures never surface as `AppError`; they are rendered as
/// problem responses by the transport chain.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AppError {
    /// KV backend failed.
    #[error("KV error: {0}")]
    Kv(#[from] KvError),

    /// Registry read or write failed.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Adapter construction failed (bad base URL, etc).
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("Hash error: {0}")]
    Hash(#[from] HashError),

    /// Network request failed (HTTP client).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// File system or socket I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(#[from] llmgate_types::ConfigError),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

/// Result type alias for core operations.
pub type AppResult<T> = Result<T, AppError>;
