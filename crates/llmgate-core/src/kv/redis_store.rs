//! Redis KV backend.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use super::{KvResult, KvStore};

/// Networked store over a single multiplexed connection.
///
/// The connection is cloned per call; redis-rs pipelines concurrent commands
/// over it.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.client.get_connection_info().addr)
            .finish()
    }
}

impl RedisStore {
    /// Open a client and establish the connection eagerly so startup fails
    /// fast when the server is unreachable.
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let store = Self { client, conn };
        store.ping().await?;
        info!(addr = %store.client.get_connection_info().addr, "Connected to redis");
        Ok(store)
    }

    pub async fn ping(&self) -> KvResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Walk the keyspace with `SCAN … MATCH … COUNT` until the cursor
    /// returns to zero. SCAN may report a key more than once; duplicates are
    /// dropped here.
    async fn scan_keys(&self, pattern: &str, page_hint: usize) -> KvResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut seen: HashSet<String> = HashSet::new();
        let mut keys = Vec::new();
        let mut cursor = "0".to_string();
        loop {
            let (next_cursor, page): (String, Vec<String>) = redis::cmd("SCAN")
                .arg(&cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(page_hint.max(1))
                .query_async(&mut conn)
                .await?;

            keys.extend(page.into_iter().filter(|k| seen.insert(k.clone())));

            if next_cursor == "0" {
                break;
            }
            cursor = next_cursor;
        }
        debug!(pattern = %pattern, keys = keys.len(), "Redis scan complete");
        Ok(keys)
    }
}

fn millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        let mut conn = self.conn.clone();
        if ttl.is_zero() {
            let _: () = conn.set(key, value).await?;
        } else {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(millis(ttl))
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn incr_by(&self, key: &str, amount: i64) -> KvResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, amount).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool> {
        let mut conn = self.conn.clone();
        if ttl.is_zero() {
            let present: bool = conn.exists(key).await?;
            if present {
                let _: bool = conn.persist(key).await?;
            }
            return Ok(present);
        }
        Ok(conn.pexpire(key, millis(ttl)).await?)
    }

    async fn scan_get_all(
        &self,
        pattern: &str,
        page_hint: usize,
    ) -> KvResult<BTreeMap<String, String>> {
        let keys = self.scan_keys(pattern, page_hint).await?;
        let mut conn = self.conn.clone();
        let mut out = BTreeMap::new();
        for chunk in keys.chunks(page_hint.max(1)) {
            let values: Vec<Option<String>> =
                redis::cmd("MGET").arg(chunk).query_async(&mut conn).await?;
            for (key, value) in chunk.iter().zip(values) {
                // Expired between SCAN and MGET.
                if let Some(value) = value {
                    out.insert(key.clone(), value);
                }
            }
        }
        Ok(out)
    }

    async fn scan_all(&self, pattern: &str, page_hint: usize) -> KvResult<Vec<String>> {
        let mut keys = self.scan_keys(pattern, page_hint).await?;
        keys.sort();
        Ok(keys)
    }

    async fn close(&self) -> KvResult<()> {
        debug!("Redis store closed; multiplexed connection drops with the last handle");
        Ok(())
    }
}
