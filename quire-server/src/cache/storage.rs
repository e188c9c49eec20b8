//! Storage Adapters
//!
//! Minimal string key/value contract the TTL cache is layered on, with two
//! implementations:
//! - [`MemoryStorage`]: volatile in-process map
//! - [`DurableStorage`]: namespaced view over a [`DurableStore`], a JSON file
//!   on disk that survives process restarts
//!
//! Every adapter owns a key prefix. Callers pass logical keys; the adapter
//! stores `"<prefix><key>"` and `clear` only touches its own namespace, so
//! unrelated data sharing the physical store is left alone.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::error::{QuireError, Result};

/// Key/value contract implemented by every cache backend
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Raw value stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Remove `key`; removing an absent key is not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key in this adapter's namespace
    async fn clear(&self) -> Result<()>;

    /// Logical keys currently stored in this adapter's namespace
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Volatile in-process storage
#[derive(Clone)]
pub struct MemoryStorage {
    prefix: String,
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.read().get(&self.full_key(key)).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.data.write().insert(self.full_key(key), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.data.write().remove(&self.full_key(key));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let prefix = &self.prefix;
        self.data.write().retain(|k, _| !k.starts_with(prefix.as_str()));
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let data = self.data.read();
        Ok(data
            .keys()
            .filter_map(|k| k.strip_prefix(self.prefix.as_str()))
            .map(str::to_string)
            .collect())
    }
}

/// File-backed string map shared by every durable namespace
///
/// The whole map is rewritten on each mutation (write to a temp file, then
/// rename). A failed write leaves both the file and the in-memory view
/// untouched.
pub struct DurableStore {
    path: PathBuf,
    quota_bytes: usize,
    data: RwLock<HashMap<String, String>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl DurableStore {
    /// Open the store at `path`, loading any existing contents
    ///
    /// An unreadable or corrupt file is logged and replaced by an empty store
    /// on the next write.
    pub async fn open(path: impl AsRef<Path>, quota_bytes: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, String>>(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    warn!("Durable store {:?} is corrupt, starting empty: {}", path, e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(
            "Opened durable store at {:?} ({} keys, quota={} bytes)",
            path,
            data.len(),
            quota_bytes
        );

        Ok(Self {
            path,
            quota_bytes,
            data: RwLock::new(data),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.data.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    pub async fn set(&self, key: &str, value: String) -> Result<()> {
        self.mutate(|map| {
            map.insert(key.to_string(), value);
        })
        .await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        if !self.data.read().contains_key(key) {
            return Ok(());
        }
        self.mutate(|map| {
            map.remove(key);
        })
        .await
    }

    /// Remove every key starting with `prefix` in a single flush
    pub async fn remove_prefixed(&self, prefix: &str) -> Result<usize> {
        let mut removed = 0;
        self.mutate(|map| {
            let before = map.len();
            map.retain(|k, _| !k.starts_with(prefix));
            removed = before - map.len();
        })
        .await?;
        Ok(removed)
    }

    async fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let _guard = self.write_lock.lock().await;

        let mut next = self.data.read().clone();
        apply(&mut next);

        let bytes = serde_json::to_vec(&next)?;
        if bytes.len() > self.quota_bytes {
            return Err(QuireError::QuotaExceeded {
                used: bytes.len(),
                quota: self.quota_bytes,
            });
        }

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        debug!("Flushed durable store ({} keys, {} bytes)", next.len(), bytes.len());
        *self.data.write() = next;

        Ok(())
    }
}

/// Namespaced adapter over a shared [`DurableStore`]
#[derive(Clone)]
pub struct DurableStorage {
    prefix: String,
    store: Arc<DurableStore>,
}

impl DurableStorage {
    pub fn new(store: Arc<DurableStore>, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            store,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl StorageAdapter for DurableStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.store.get(&self.full_key(key)))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.store.set(&self.full_key(key), value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.store.remove(&self.full_key(key)).await
    }

    async fn clear(&self) -> Result<()> {
        let removed = self.store.remove_prefixed(&self.prefix).await?;
        debug!("Cleared {} durable keys under prefix {}", removed, self.prefix);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys()
            .into_iter()
            .filter_map(|k| k.strip_prefix(self.prefix.as_str()).map(str::to_string))
            .collect())
    }
}
