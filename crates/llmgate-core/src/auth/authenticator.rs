use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use super::hasher::Argon2idHasher;
use super::keystore::KeyReader;
use super::{AuthError, Authenticator, Identity};

const PAD_SECRET: &[u8] = b"timing-pad";

/// Verifies `{key_id}.{secret}` tokens against stored Argon2id PHC strings.
///
/// Every rejection costs one Argon2id evaluation: when the record cannot be
/// used, the secret is verified against a padding hash instead.
#[derive(Debug, Clone)]
pub struct KeyAuthenticator {
    keys: Arc<dyn KeyReader>,
    hasher: Argon2idHasher,
    pad_phc: Arc<str>,
}

impl KeyAuthenticator {
    pub fn new(keys: Arc<dyn KeyReader>, hasher: Argon2idHasher) -> Result<Self, AuthError> {
        let pad_phc = hasher.hash(PAD_SECRET)?;
        Ok(Self { keys, hasher, pad_phc: Arc::from(pad_phc) })
    }

    async fn verify_blocking(&self, secret: &str, phc: &str) -> Result<bool, AuthError> {
        let hasher = self.hasher;
        let secret = secret.as_bytes().to_vec();
        let phc = phc.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&secret, &phc))
            .await
            .map_err(|e| AuthError::Store(format!("verification task failed: {e}")))?
            .map_err(AuthError::from)
    }

    /// Burn one verification so early rejects are not faster than a mismatch.
    async fn pad(&self, secret: &str) {
        let pad_phc = Arc::clone(&self.pad_phc);
        if let Err(e) = self.verify_blocking(secret, &pad_phc).await {
            debug!(error = %e, "Padding verification failed");
        }
    }
}

#[async_trait]
impl Authenticator for KeyAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let Some((key_id, secret)) = split_token(token) else {
            self.pad(token).await;
            return Err(AuthError::Malformed);
        };

        let record = match self.keys.get_by_prefix(key_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.pad(secret).await;
                return Err(AuthError::UnknownKey);
            },
            Err(e) => {
                self.pad(secret).await;
                return Err(AuthError::Store(e.to_string()));
            },
        };

        let now = Utc::now();
        if record.is_expired_at(now) {
            self.pad(secret).await;
            return Err(AuthError::Expired);
        }
        if !record.is_usable_at(now) {
            self.pad(secret).await;
            return Err(AuthError::Inactive);
        }

        if !self.verify_blocking(secret, &record.phc).await? {
            return Err(AuthError::Mismatch);
        }

        let keys = Arc::clone(&self.keys);
        let touched_id = record.key_id.clone();
        tokio::spawn(async move {
            if let Err(e) = keys.touch_last_used(&touched_id, Utc::now()).await {
                warn!(key_id = %touched_id, error = %e, "Failed to update key last-used time");
            }
        });

        Ok(Identity {
            key_id: record.key_id,
            tenant: record.tenant,
            app: record.app,
            user_id: record.user_id.unwrap_or_default(),
        })
    }
}

/// Accepts every request as tenant `default`, app `default`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuthenticator;

#[async_trait]
impl Authenticator for NoopAuthenticator {
    async fn authenticate(&self, _token: &str) -> Result<Identity, AuthError> {
        Ok(Identity {
            key_id: String::new(),
            tenant: "default".to_string(),
            app: "default".to_string(),
            user_id: String::new(),
        })
    }
}

/// Split on the last `.`; both halves must be non-empty.
pub(crate) fn split_token(token: &str) -> Option<(&str, &str)> {
    token.trim().rsplit_once('.').filter(|(id, secret)| !id.is_empty() && !secret.is_empty())
}
