//! Query Cache façade
//!
//! Routes every operation to the memory or durable [`TtlCache`] by
//! [`Backend`]. Invalidation always hits both backends so callers never need
//! to know which one produced a value. This is the only eviction path the
//! query and optimistic controllers use.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::storage::{DurableStorage, DurableStore, MemoryStorage};
use super::ttl::TtlCache;
use crate::core::{Backend, CacheStats, Clock, Result};

/// Settings used to build a [`QueryCache`]
#[derive(Debug, Clone)]
pub struct QueryCacheConfig {
    pub memory_prefix: String,
    pub durable_prefix: String,
    pub default_ttl: Duration,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            memory_prefix: "quire:mem:".to_string(),
            durable_prefix: "quire:".to_string(),
            default_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Per-backend statistics snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryCacheStats {
    pub memory: CacheStatsView,
    pub durable: CacheStatsView,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStatsView {
    pub gets: u64,
    pub sets: u64,
    pub removes: u64,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub storage_errors: u64,
    pub hit_rate: f64,
}

impl From<CacheStats> for CacheStatsView {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            gets: stats.gets,
            sets: stats.sets,
            removes: stats.removes,
            hits: stats.hits,
            misses: stats.misses,
            expired: stats.expired,
            storage_errors: stats.storage_errors,
        }
    }
}

pub struct QueryCache {
    memory: TtlCache,
    durable: TtlCache,
}

impl QueryCache {
    /// Build a façade over two already-constructed TTL caches
    pub fn new(memory: TtlCache, durable: TtlCache) -> Self {
        Self { memory, durable }
    }

    /// Build a façade with a fresh memory backend and a durable backend over `store`
    pub fn with_store(
        config: &QueryCacheConfig,
        store: Arc<DurableStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(
            "Initializing query cache (default_ttl={:?}, durable store={:?})",
            config.default_ttl,
            store.path()
        );

        let memory = TtlCache::new(
            "memory",
            Arc::new(MemoryStorage::new(config.memory_prefix.clone())),
            clock.clone(),
            config.default_ttl,
        );
        let durable = TtlCache::new(
            "durable",
            Arc::new(DurableStorage::new(store, config.durable_prefix.clone())),
            clock,
            config.default_ttl,
        );

        Self::new(memory, durable)
    }

    /// Build a façade whose durable slot is also an in-process map
    ///
    /// Nothing survives the process; used by tests and ephemeral workers.
    pub fn volatile(config: &QueryCacheConfig, clock: Arc<dyn Clock>) -> Self {
        let memory = TtlCache::new(
            "memory",
            Arc::new(MemoryStorage::new(config.memory_prefix.clone())),
            clock.clone(),
            config.default_ttl,
        );
        let durable = TtlCache::new(
            "durable",
            Arc::new(MemoryStorage::new(config.durable_prefix.clone())),
            clock,
            config.default_ttl,
        );

        Self::new(memory, durable)
    }

    /// Open the durable store at `path` and build the façade over it
    pub async fn open(
        config: &QueryCacheConfig,
        path: impl AsRef<std::path::Path>,
        quota_bytes: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let store = Arc::new(DurableStore::open(path, quota_bytes).await?);
        Ok(Self::with_store(config, store, clock))
    }

    fn backend(&self, backend: Backend) -> &TtlCache {
        match backend {
            Backend::Memory => &self.memory,
            Backend::Durable => &self.durable,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str, backend: Backend) -> Option<T> {
        self.backend(backend).get(key).await
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        backend: Backend,
    ) {
        self.backend(backend).set(key, value, ttl).await
    }

    /// Remove `key` from both backends
    pub async fn invalidate(&self, key: &str) {
        debug!("Invalidating {} in all backends", key);
        self.memory.remove(key).await;
        self.durable.remove(key).await;
    }

    pub async fn invalidate_many<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.invalidate(key.as_ref()).await;
        }
    }

    /// Clear both backends
    pub async fn clear(&self) {
        info!("Clearing all cache backends");
        self.memory.clear().await;
        self.durable.clear().await;
    }

    /// Sweep expired entries from both backends
    pub async fn cleanup_expired(&self) -> usize {
        self.memory.cleanup_expired().await + self.durable.cleanup_expired().await
    }

    pub fn stats(&self) -> QueryCacheStats {
        QueryCacheStats {
            memory: self.memory.stats().into(),
            durable: self.durable.stats().into(),
        }
    }

    /// Start background TTL cleanup task
    pub fn start_ttl_cleanup(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        info!("Starting cache TTL cleanup task (interval={:?})", interval);

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                cache.cleanup_expired().await;
            }
        })
    }
}
