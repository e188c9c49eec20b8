//! Cache Module
//!
//! Provides the caching layers:
//! - Storage adapters: memory map and durable on-disk store
//! - TTL cache: expiry envelopes over any adapter
//! - Query cache: backend-routing façade with cross-backend invalidation

pub mod query_cache;
pub mod storage;
pub mod ttl;

pub use query_cache::{CacheStatsView, QueryCache, QueryCacheConfig, QueryCacheStats};
pub use storage::{DurableStorage, DurableStore, MemoryStorage, StorageAdapter};
pub use ttl::TtlCache;
