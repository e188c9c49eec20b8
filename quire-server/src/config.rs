use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::QueryCacheConfig;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: Server,
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub memory_prefix: String,
    pub durable_prefix: String,
    pub durable_path: PathBuf,
    pub durable_quota_bytes: usize,
    pub default_ttl_secs: u64,
    pub ttl_cleanup_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests admitted per client per window
    pub max_requests: u64,
    pub window_ms: u64,
    pub cleanup_interval_secs: u64,
    /// Upper bound on distinct client counters kept in memory
    pub max_tracked_clients: usize,
    /// Key clients by `X-Forwarded-For`/`X-Real-IP`; only safe behind a proxy
    /// that overwrites those headers
    pub trust_proxy_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 60,
            window_ms: 60_000,
            cleanup_interval_secs: 60,
            max_tracked_clients: 100_000,
            trust_proxy_headers: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: Server {
                host: "0.0.0.0".to_string(),
                port: 15600,
            },
            cache: CacheConfig {
                memory_prefix: "quire:mem:".to_string(),
                durable_prefix: "quire:".to_string(),
                durable_path: PathBuf::from("./data/quire-store.json"),
                durable_quota_bytes: 5 * 1024 * 1024,
                default_ttl_secs: 300,
                ttl_cleanup_interval_ms: 30_000,
            },
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }
}

impl ServerConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Convert to QueryCacheConfig
    pub fn to_query_cache_config(&self) -> QueryCacheConfig {
        QueryCacheConfig {
            memory_prefix: self.cache.memory_prefix.clone(),
            durable_prefix: self.cache.durable_prefix.clone(),
            default_ttl: Duration::from_secs(self.cache.default_ttl_secs),
        }
    }

    pub fn ttl_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cache.ttl_cleanup_interval_ms)
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
