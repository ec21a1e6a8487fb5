//! Argon2id hashing in PHC string form:
//! `$argon2id$v=19$m={kib},t={iterations},p={lanes}${salt}${hash}` with
//! unpadded standard base64 for salt and hash.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use llmgate_types::AuthConfig;
use rand::RngCore;
use subtle::ConstantTimeEq;
use thiserror::Error;

const SALT_LEN: usize = 16;
const PHC_ID: &str = "argon2id";
const PHC_VERSION: &str = "v=19";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("unsupported hash algorithm")]
    Unsupported,

    #[error("malformed PHC string: {0}")]
    Malformed(String),

    #[error("argon2 failure: {0}")]
    Argon2(String),
}

/// Argon2id parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2idHasher {
    /// Iterations
    pub time: u32,
    pub memory_kib: u32,
    /// Parallelism (lanes)
    pub threads: u32,
    /// Output length in bytes
    pub key_len: u32,
}

impl Default for Argon2idHasher {
    fn default() -> Self {
        Self { time: 1, memory_kib: 64 * 1024, threads: 1, key_len: 32 }
    }
}

impl From<&AuthConfig> for Argon2idHasher {
    fn from(config: &AuthConfig) -> Self {
        Self {
            time: config.argon2_time,
            memory_kib: config.argon2_memory_kib,
            threads: config.argon2_threads,
            key_len: config.argon2_key_len,
        }
    }
}

impl Argon2idHasher {
    pub fn new(time: u32, memory_kib: u32, threads: u32, key_len: u32) -> Self {
        Self { time, memory_kib, threads, key_len }
    }

    /// Hash `secret` with a fresh random salt.
    pub fn hash(&self, secret: &[u8]) -> Result<String, HashError> {
        let mut salt = [0_u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        self.hash_with_salt(secret, &salt)
    }

    pub fn hash_with_salt(&self, secret: &[u8], salt: &[u8]) -> Result<String, HashError> {
        let params =
            PhcParams { memory_kib: self.memory_kib, time: self.time, threads: self.threads };
        let key = derive(secret, salt, params, self.key_len as usize)?;
        Ok(format!(
            "${PHC_ID}${PHC_VERSION}$m={},t={},p={}${}${}",
            self.memory_kib,
            self.time,
            self.threads,
            STANDARD_NO_PAD.encode(salt),
            STANDARD_NO_PAD.encode(key),
        ))
    }

    /// Check `secret` against a stored PHC string.
    ///
    /// The parameters embedded in `phc` are used, not `self`'s, so records
    /// hashed under older settings keep verifying.
    pub fn verify(&self, secret: &[u8], phc: &str) -> Result<bool, HashError> {
        let parsed = Phc::parse(phc)?;
        let got = derive(secret, &parsed.salt, parsed.params, parsed.hash.len())?;
        Ok(got.ct_eq(&parsed.hash).into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PhcParams {
    memory_kib: u32,
    time: u32,
    threads: u32,
}

#[derive(Debug)]
struct Phc {
    params: PhcParams,
    salt: Vec<u8>,
    hash: Vec<u8>,
}

impl Phc {
    fn parse(phc: &str) -> Result<Self, HashError> {
        let parts: Vec<&str> = phc.split('$').collect();
        let [empty, id, version, params, salt, hash] = parts.as_slice() else {
            return Err(HashError::Malformed(format!("expected 6 segments, got {}", parts.len())));
        };
        if !empty.is_empty() || *id != PHC_ID {
            return Err(HashError::Unsupported);
        }
        if *version != PHC_VERSION {
            return Err(HashError::Malformed(format!("unsupported version {version}")));
        }

        let mut parsed = PhcParams { memory_kib: 0, time: 0, threads: 0 };
        for pair in params.split(',') {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| HashError::Malformed(format!("parameter {pair:?}")))?;
            let value: u32 = value
                .parse()
                .map_err(|_| HashError::Malformed(format!("parameter {pair:?}")))?;
            match name {
                "m" => parsed.memory_kib = value,
                "t" => parsed.time = value,
                "p" => parsed.threads = value,
                _ => return Err(HashError::Malformed(format!("unknown parameter {name:?}"))),
            }
        }
        if parsed.memory_kib == 0 || parsed.time == 0 || parsed.threads == 0 {
            return Err(HashError::Malformed("missing m, t or p".to_string()));
        }

        let salt = STANDARD_NO_PAD.decode(salt).map_err(|e| HashError::Malformed(e.to_string()))?;
        let hash = STANDARD_NO_PAD.decode(hash).map_err(|e| HashError::Malformed(e.to_string()))?;
        if hash.is_empty() {
            return Err(HashError::Malformed("empty hash".to_string()));
        }
        Ok(Self { params: parsed, salt, hash })
    }
}

fn derive(
    secret: &[u8],
    salt: &[u8],
    params: PhcParams,
    out_len: usize,
) -> Result<Vec<u8>, HashError> {
    let params = Params::new(params.memory_kib, params.time, params.threads, Some(out_len))
        .map_err(|e| HashError::Argon2(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = vec![0_u8; out_len];
    argon.hash_password_into(secret, salt, &mut out).map_err(|e| HashError::Argon2(e.to_string()))?;
    Ok(out)
}
