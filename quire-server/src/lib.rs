pub mod cache;
pub mod config;
pub mod core;
pub mod optimistic;
pub mod query;
pub mod server;

// Re-export commonly used types
pub use cache::{
    DurableStorage, DurableStore, MemoryStorage, QueryCache, QueryCacheConfig, QueryCacheStats,
    StorageAdapter, TtlCache,
};
pub use config::{RateLimitConfig, ServerConfig};
pub use core::{
    Backend, CacheEnvelope, CacheStats, Clock, ManualClock, QuireError, Result, SystemClock,
};
pub use optimistic::{Identifiable, MutationState, OptimisticList, OptimisticMutation};
pub use query::{
    CachedQuery, PagedOptions, PagedQuery, PagedState, QueryOptions, QueryState, QueryStatus,
};
pub use server::{AppState, RateLimiter, create_router};
