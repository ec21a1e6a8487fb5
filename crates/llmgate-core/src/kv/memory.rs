//! In-process KV backend.

use async_trait::async_trait;
use globset::{GlobBuilder, GlobMatcher};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{KvError, KvResult, KvStore};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

fn deadline(ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Instant::now().checked_add(ttl)
    }
}

/// Compile a Redis-style glob: `*` crosses `:`, `\` escapes.
fn compile_pattern(pattern: &str) -> KvResult<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| KvError::Pattern { pattern: pattern.to_string(), message: e.to_string() })
}

/// Concurrent in-memory map. Expired entries are dropped lazily on access and
/// during scans; [`MemoryStore::sweep`] purges them eagerly.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> KvResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        Ok(())
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_matching(&self, pattern: &str) -> KvResult<BTreeMap<String, String>> {
        let matcher = compile_pattern(pattern)?;
        let now = Instant::now();
        let mut found = BTreeMap::new();
        let mut expired = Vec::new();
        {
            let entries = self.entries.read();
            for (key, entry) in entries.iter() {
                if entry.is_expired(now) {
                    expired.push(key.clone());
                } else if matcher.is_match(key.as_str()) {
                    found.insert(key.clone(), entry.value.clone());
                }
            }
        }
        if !expired.is_empty() {
            let mut entries = self.entries.write();
            for key in &expired {
                if entries.get(key).is_some_and(|e| e.is_expired(now)) {
                    entries.remove(key);
                }
            }
            debug!(evicted = expired.len(), "Evicted expired keys during scan");
        }
        Ok(found)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.ensure_open()?;
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {},
            }
        }
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        self.ensure_open()?;
        self.entries
            .write()
            .insert(key.to_string(), Entry { value: value.to_string(), expires_at: deadline(ttl) });
        Ok(())
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        self.ensure_open()?;
        self.entries.write().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn incr_by(&self, key: &str, amount: i64) -> KvResult<i64> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut entries = self.entries.write();
        let (current, expires_at) = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let current = entry
                    .value
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| KvError::NotInteger { key: key.to_string() })?;
                (current, entry.expires_at)
            },
            _ => (0, None),
        };
        let next = current
            .checked_add(amount)
            .ok_or_else(|| KvError::NotInteger { key: key.to_string() })?;
        entries.insert(key.to_string(), Entry { value: next.to_string(), expires_at });
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.get(key).map(|e| e.is_expired(now)) {
            Some(false) => {
                if let Some(entry) = entries.get_mut(key) {
                    entry.expires_at = deadline(ttl);
                }
                Ok(true)
            },
            Some(true) => {
                entries.remove(key);
                Ok(false)
            },
            None => Ok(false),
        }
    }

    async fn scan_get_all(
        &self,
        pattern: &str,
        _page_hint: usize,
    ) -> KvResult<BTreeMap<String, String>> {
        self.ensure_open()?;
        self.live_matching(pattern)
    }

    async fn scan_all(&self, pattern: &str, _page_hint: usize) -> KvResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.live_matching(pattern)?.into_keys().collect())
    }

    async fn close(&self) -> KvResult<()> {
        self.closed.store(true, Ordering::Release);
        self.entries.write().clear();
        Ok(())
    }
}
