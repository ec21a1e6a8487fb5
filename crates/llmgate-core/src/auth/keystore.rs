//! API key storage contract and the in-process implementation.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use llmgate_types::{KeyRecord, KeyStatus};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use std::collections::BTreeMap;
use thiserror::Error;

use super::hasher::{Argon2idHasher, HashError};

const KEY_ID_LEN: usize = 12;
const SECRET_BYTES: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum KeyStoreError {
    #[error("key {key_id} not found")]
    NotFound { key_id: String },

    #[error("key {key_id} already exists")]
    Duplicate { key_id: String },

    #[error("key store backend error: {0}")]
    Backend(String),
}

/// Read side used on the request path.
#[async_trait]
pub trait KeyReader: Send + Sync + std::fmt::Debug {
    async fn get_by_prefix(&self, key_id: &str) -> Result<Option<KeyRecord>, KeyStoreError>;

    async fn touch_last_used(&self, key_id: &str, at: DateTime<Utc>) -> Result<(), KeyStoreError>;
}

/// Write side used by key issuance and revocation.
#[async_trait]
pub trait KeyWriter: Send + Sync {
    async fn insert(&self, record: KeyRecord) -> Result<(), KeyStoreError>;

    async fn update_status(&self, key_id: &str, status: KeyStatus) -> Result<(), KeyStoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    records: DashMap<String, KeyRecord>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl KeyReader for MemoryKeyStore {
    async fn get_by_prefix(&self, key_id: &str) -> Result<Option<KeyRecord>, KeyStoreError> {
        Ok(self.records.get(key_id).map(|r| r.value().clone()))
    }

    async fn touch_last_used(&self, key_id: &str, at: DateTime<Utc>) -> Result<(), KeyStoreError> {
        let mut record = self
            .records
            .get_mut(key_id)
            .ok_or_else(|| KeyStoreError::NotFound { key_id: key_id.to_string() })?;
        record.last_used_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl KeyWriter for MemoryKeyStore {
    async fn insert(&self, record: KeyRecord) -> Result<(), KeyStoreError> {
        match self.records.entry(record.key_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(KeyStoreError::Duplicate { key_id: record.key_id })
            },
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            },
        }
    }

    async fn update_status(&self, key_id: &str, status: KeyStatus) -> Result<(), KeyStoreError> {
        let mut record = self
            .records
            .get_mut(key_id)
            .ok_or_else(|| KeyStoreError::NotFound { key_id: key_id.to_string() })?;
        record.status = status;
        Ok(())
    }
}

/// Attribution for a newly issued key.
#[derive(Debug, Clone, Default)]
pub struct NewKey {
    pub tenant: String,
    pub app: String,
    pub user_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

/// Issue a key. Returns the token `{key_id}.{secret}`, shown once, and the
/// record to store. The record holds only the PHC and the last four
/// characters of the secret.
pub fn generate_key(
    hasher: &Argon2idHasher,
    new_key: NewKey,
) -> Result<(String, KeyRecord), HashError> {
    let mut rng = rand::thread_rng();
    let key_id: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(KEY_ID_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    let mut secret_bytes = [0_u8; SECRET_BYTES];
    rng.fill_bytes(&mut secret_bytes);
    let secret = URL_SAFE_NO_PAD.encode(secret_bytes);

    let phc = hasher.hash(secret.as_bytes())?;
    let last_four = secret[secret.len().saturating_sub(4)..].to_string();

    let record = KeyRecord {
        key_id: key_id.clone(),
        tenant: new_key.tenant,
        app: new_key.app,
        user_id: new_key.user_id,
        status: KeyStatus::Active,
        phc,
        expires_at: new_key.expires_at,
        last_used_at: None,
        last_four,
        metadata: new_key.metadata,
        created_at: Utc::now(),
    };
    Ok((format!("{key_id}.{secret}"), record))
}
