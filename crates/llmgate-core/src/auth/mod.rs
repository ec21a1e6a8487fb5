//! Caller authentication.
//!
//! Tokens have the form `{key_id}.{secret}`. The key id selects a stored
//! [`KeyRecord`](llmgate_types::KeyRecord); the secret is checked against its
//! Argon2id PHC string. Callers only ever see a uniform `unauthorized`.

mod authenticator;
mod hasher;
mod keystore;

pub use authenticator::{KeyAuthenticator, NoopAuthenticator};
pub use hasher::{Argon2idHasher, HashError};
pub use keystore::{generate_key, KeyReader, KeyStoreError, KeyWriter, MemoryKeyStore, NewKey};

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    #[error("malformed credential")]
    Malformed,

    #[error("unknown key")]
    UnknownKey,

    #[error("key is not active")]
    Inactive,

    #[error("key expired")]
    Expired,

    #[error("secret mismatch")]
    Mismatch,

    #[error("key store failure: {0}")]
    Store(String),

    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Who is calling, attached to the request after authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub key_id: String,
    pub tenant: String,
    pub app: String,
    /// Empty when the key is not bound to a user
    pub user_id: String,
}

#[async_trait]
pub trait Authenticator: Send + Sync + std::fmt::Debug {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Token from `Authorization: Bearer …`, else `X-API-Key`. Empty when neither
/// is present.
pub fn extract_token(headers: &HeaderMap) -> &str {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-api-key").and_then(|h| h.to_str().ok()))
        .map(str::trim)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), "");

        headers.insert("x-api-key", header::HeaderValue::from_static(" p.s "));
        assert_eq!(extract_token(&headers), "p.s");

        headers.insert(header::AUTHORIZATION, header::HeaderValue::from_static("Bearer a.b"));
        assert_eq!(extract_token(&headers), "a.b");

        headers.insert(header::AUTHORIZATION, header::HeaderValue::from_static("Basic zzz"));
        assert_eq!(extract_token(&headers), "p.s");
    }
}
