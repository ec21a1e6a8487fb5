//! Backend selection from configuration.

use llmgate_types::{KvBackend, KvConfig};
use std::sync::Arc;
use tracing::info;

use super::{BreakerConfig, CircuitBreakerStore, KvResult, KvStore, MemoryStore, RedisStore};

/// Build the configured store. A redis backend is connected eagerly and, when
/// enabled, wrapped in a [`CircuitBreakerStore`].
pub async fn build_store(config: &KvConfig) -> KvResult<Arc<dyn KvStore>> {
    match config.backend {
        KvBackend::Memory => {
            info!("Using in-memory KV store");
            Ok(Arc::new(MemoryStore::new()))
        },
        KvBackend::Redis => {
            let store = RedisStore::connect(&config.redis_url()).await?;
            if config.circuit_breaker_enabled {
                info!("Using redis KV store behind circuit breaker");
                Ok(Arc::new(CircuitBreakerStore::new(store, BreakerConfig::default())))
            } else {
                info!("Using redis KV store");
                Ok(Arc::new(store))
            }
        },
    }
}
