use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::QuireError;

/// Which physical store services a cache operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Volatile in-process map
    #[default]
    Memory,
    /// On-disk store that survives restarts
    Durable,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Memory, Backend::Durable];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Memory => "memory",
            Backend::Durable => "durable",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = QuireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "durable" => Ok(Backend::Durable),
            other => Err(QuireError::InvalidBackend(other.to_string())),
        }
    }
}

/// Serialized form of every cache entry
///
/// `expires_at` is an absolute epoch-millisecond timestamp; the entry is
/// dead once `now >= expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEnvelope<T> {
    pub value: T,
    pub expires_at: u64,
}

impl<T> CacheEnvelope<T> {
    pub fn new(value: T, expires_at: u64) -> Self {
        Self { value, expires_at }
    }

    /// Check if the envelope has expired at `now_ms`
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Statistics for a TTL cache
#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    /// Number of GET operations
    pub gets: u64,
    /// Number of SET operations
    pub sets: u64,
    /// Number of explicit removals
    pub removes: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses (absent, expired or unreadable)
    pub misses: u64,
    /// Entries evicted because their TTL had passed
    pub expired: u64,
    /// Storage failures that were logged and swallowed
    pub storage_errors: u64,
}

impl CacheStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
