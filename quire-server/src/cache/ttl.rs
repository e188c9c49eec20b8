//! TTL Cache
//!
//! Wraps a [`StorageAdapter`] with expiration-at-write semantics. Every entry
//! is stored as a [`CacheEnvelope`] carrying its absolute expiry; a read at or
//! past that instant evicts the entry and reports a miss.
//!
//! The cache is an optimization layer: storage and serialization failures are
//! logged and counted, then treated as a miss on read and as a no-op on write.

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::storage::StorageAdapter;
use crate::core::{CacheEnvelope, CacheStats, Clock};

pub struct TtlCache {
    name: &'static str,
    storage: Arc<dyn StorageAdapter>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    stats: RwLock<CacheStats>,
}

impl TtlCache {
    pub fn new(
        name: &'static str,
        storage: Arc<dyn StorageAdapter>,
        clock: Arc<dyn Clock>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            name,
            storage,
            clock,
            default_ttl,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get a live value by key
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.stats.write().gets += 1;

        let raw = match self.storage.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.record_miss();
                return None;
            }
            Err(e) => {
                warn!("[{}] read failed for {}: {}", self.name, key, e);
                self.record_storage_error();
                self.record_miss();
                return None;
            }
        };

        // Decode the envelope before the payload so expiry is honored even
        // when the caller asks for a different shape than was stored.
        let envelope: CacheEnvelope<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("[{}] corrupt envelope for {}: {}", self.name, key, e);
                self.record_storage_error();
                self.record_miss();
                return None;
            }
        };

        if envelope.is_expired(self.clock.now_ms()) {
            debug!("[{}] key expired: {}", self.name, key);
            self.evict_expired(key).await;
            self.record_miss();
            return None;
        }

        match serde_json::from_value::<T>(envelope.value) {
            Ok(value) => {
                self.stats.write().hits += 1;
                Some(value)
            }
            Err(e) => {
                warn!("[{}] payload for {} has unexpected shape: {}", self.name, key, e);
                self.record_miss();
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl` (the cache default when `None`)
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expires_at = self.clock.now_ms().saturating_add(ttl_ms);
        debug!("[{}] SET key={}, ttl={:?}", self.name, key, ttl);

        let raw = match serde_json::to_string(&CacheEnvelope::new(value, expires_at)) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("[{}] failed to serialize {}: {}", self.name, key, e);
                self.record_storage_error();
                return;
            }
        };

        if let Err(e) = self.storage.set(key, raw).await {
            warn!("[{}] write failed for {}: {}", self.name, key, e);
            self.record_storage_error();
            return;
        }

        self.stats.write().sets += 1;
    }

    /// Remove a key
    pub async fn remove(&self, key: &str) {
        debug!("[{}] REMOVE key={}", self.name, key);
        if let Err(e) = self.storage.remove(key).await {
            warn!("[{}] remove failed for {}: {}", self.name, key, e);
            self.record_storage_error();
            return;
        }
        self.stats.write().removes += 1;
    }

    /// Remove every entry in this cache's namespace
    pub async fn clear(&self) {
        if let Err(e) = self.storage.clear().await {
            warn!("[{}] clear failed: {}", self.name, e);
            self.record_storage_error();
        }
    }

    /// Evict every expired entry, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let keys = match self.storage.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("[{}] could not list keys for cleanup: {}", self.name, e);
                self.record_storage_error();
                return 0;
            }
        };

        let now = self.clock.now_ms();
        let mut removed = 0;

        for key in keys {
            let Ok(Some(raw)) = self.storage.get(&key).await else {
                continue;
            };
            let expired = serde_json::from_str::<CacheEnvelope<serde_json::Value>>(&raw)
                .map(|envelope| envelope.is_expired(now))
                .unwrap_or(false);
            if expired {
                self.evict_expired(&key).await;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("[{}] cleaned up {} expired keys", self.name, removed);
        }

        removed
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    async fn evict_expired(&self, key: &str) {
        match self.storage.remove(key).await {
            Ok(()) => self.stats.write().expired += 1,
            Err(e) => {
                warn!("[{}] failed to evict expired {}: {}", self.name, key, e);
                self.record_storage_error();
            }
        }
    }

    fn record_miss(&self) {
        self.stats.write().misses += 1;
    }

    fn record_storage_error(&self) {
        self.stats.write().storage_errors += 1;
    }
}
