//! Cached Query lifecycle
//!
//! Cache-first, then revalidate. Each activation (mount, key change, enable)
//! reads the key from the [`QueryCache`]; a hit is published immediately and
//! arms a staleness timer, a miss (or already-stale data) invokes the fetch
//! function and writes the result back.
//!
//! Every activation takes a new generation number. State is only published
//! while the generation that produced it is still current, so results from a
//! superseded key, a disabled query or an unmounted subscription are dropped.
//! A failed fetch records the error but never clears data already shown.

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::QueryCache;
use crate::core::{Backend, QuireError, Result};

/// Fetch function invoked with the current query key
pub type Fetcher<T> = Arc<dyn Fn(String) -> BoxFuture<'static, Result<T>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// TTL for values written back to the cache (cache default when `None`)
    pub cache_ttl: Option<Duration>,
    /// How long a published value stays fresh; zero disables revalidation
    pub stale_time: Duration,
    pub backend: Backend,
    pub enabled: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            cache_ttl: None,
            stale_time: Duration::ZERO,
            backend: Backend::Memory,
            enabled: true,
        }
    }
}

/// Observable state of one subscription
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub error: Option<QuireError>,
    pub loading: bool,
    pub is_stale: bool,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            loading: false,
            is_stale: false,
        }
    }
}

/// Coarse view of [`QueryState`] for UI binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    /// Revalidation failed; previously fetched data is still available
    ErrorWithData,
    Error,
}

impl<T> QueryState<T> {
    pub fn status(&self) -> QueryStatus {
        match (&self.data, &self.error, self.loading) {
            (_, _, true) => QueryStatus::Loading,
            (Some(_), Some(_), false) => QueryStatus::ErrorWithData,
            (None, Some(_), false) => QueryStatus::Error,
            (Some(_), None, false) => QueryStatus::Success,
            (None, None, false) => QueryStatus::Idle,
        }
    }
}

struct QueryInner<T> {
    cache: Arc<QueryCache>,
    fetcher: Fetcher<T>,
    key: RwLock<String>,
    options: RwLock<QueryOptions>,
    state: watch::Sender<QueryState<T>>,
    generation: Mutex<u64>,
    mounted: AtomicBool,
    stale_timer: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a mounted cached query; clones share the same subscription
pub struct CachedQuery<T> {
    inner: Arc<QueryInner<T>>,
}

impl<T> Clone for CachedQuery<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> CachedQuery<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Mount a subscription and run its first activation to completion
    pub async fn mount<F, Fut>(
        cache: Arc<QueryCache>,
        key: impl Into<String>,
        fetch: F,
        options: QueryOptions,
    ) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let fetcher: Fetcher<T> =
            Arc::new(move |key| -> BoxFuture<'static, Result<T>> { Box::pin(fetch(key)) });
        let (state, _) = watch::channel(QueryState::default());

        let query = Self {
            inner: Arc::new(QueryInner {
                cache,
                fetcher,
                key: RwLock::new(key.into()),
                options: RwLock::new(options),
                state,
                generation: Mutex::new(0),
                mounted: AtomicBool::new(true),
                stale_timer: Mutex::new(None),
            }),
        };

        query.inner.activate(false).await;
        query
    }

    pub fn key(&self) -> String {
        self.inner.key.read().clone()
    }

    /// Snapshot of the current state
    pub fn state(&self) -> QueryState<T> {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
        self.inner.state.subscribe()
    }

    /// Point the subscription at a new key, superseding any in-flight fetch
    pub async fn set_key(&self, key: impl Into<String>) {
        let key = key.into();
        {
            let mut current = self.inner.key.write();
            if *current == key {
                return;
            }
            *current = key;
        }
        self.inner.activate(true).await;
    }

    pub async fn set_enabled(&self, enabled: bool) {
        {
            let mut options = self.inner.options.write();
            if options.enabled == enabled {
                return;
            }
            options.enabled = enabled;
        }
        self.inner.activate(false).await;
    }

    /// Always invoke the fetch function, bypassing any cache hit
    ///
    /// After `unmount` the result is still written to the cache but never
    /// published, and no staleness timer is armed.
    pub async fn refetch(&self) -> Result<T> {
        let generation = self.inner.current_generation();
        let key = self.key();
        let options = self.inner.options.read().clone();
        self.inner.fetch(generation, key, options).await
    }

    /// Stop the staleness timer and drop any in-flight completions
    pub fn unmount(&self) {
        self.inner.mounted.store(false, Ordering::SeqCst);
        self.inner.next_generation();
        self.inner.cancel_stale_timer();
        debug!("Unmounted query {}", self.key());
    }
}

impl<T> QueryInner<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn current_generation(&self) -> u64 {
        *self.generation.lock()
    }

    fn next_generation(&self) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        *generation
    }

    /// Apply `update` if `generation` is still current
    ///
    /// The generation lock is held across the check and the send so a
    /// concurrent activation cannot slip in between them.
    fn publish<F>(&self, generation: u64, update: F) -> bool
    where
        F: FnOnce(&mut QueryState<T>),
    {
        let current = self.generation.lock();
        if *current != generation || !self.mounted.load(Ordering::SeqCst) {
            return false;
        }
        self.state.send_modify(update);
        true
    }

    fn cancel_stale_timer(&self) {
        if let Some(handle) = self.stale_timer.lock().take() {
            handle.abort();
        }
    }

    /// Start a new generation; `reset` drops state that belonged to a previous key
    async fn activate(self: &Arc<Self>, reset: bool) {
        let generation = self.next_generation();
        self.cancel_stale_timer();
        if reset {
            self.publish(generation, |s| *s = QueryState::default());
        }

        let options = self.options.read().clone();
        if !self.mounted.load(Ordering::SeqCst) || !options.enabled {
            self.publish(generation, |s| s.loading = false);
            return;
        }

        let key = self.key.read().clone();
        self.publish(generation, |s| s.loading = true);

        let hit = match self.cache.get::<T>(&key, options.backend).await {
            Some(value) => {
                debug!("Query cache hit: {}", key);
                if !self.publish(generation, |s| {
                    s.data = Some(value);
                    s.loading = false;
                }) {
                    return;
                }
                self.arm_stale_timer(generation, options.stale_time);
                true
            }
            None => false,
        };

        let is_stale = self.state.borrow().is_stale;
        if !hit || is_stale {
            let _ = self.fetch(generation, key, options).await;
        }
    }

    async fn fetch(
        self: &Arc<Self>,
        generation: u64,
        key: String,
        options: QueryOptions,
    ) -> Result<T> {
        self.publish(generation, |s| s.loading = true);

        match (self.fetcher)(key.clone()).await {
            Ok(value) => {
                if self.current_generation() != generation {
                    debug!("Discarding superseded result for {}", key);
                    return Ok(value);
                }

                self.cache
                    .set(&key, &value, options.cache_ttl, options.backend)
                    .await;

                let published = self.publish(generation, |s| {
                    s.data = Some(value.clone());
                    s.error = None;
                    s.loading = false;
                    s.is_stale = false;
                });
                if published {
                    self.arm_stale_timer(generation, options.stale_time);
                }

                Ok(value)
            }
            Err(e) => {
                warn!("Query fetch failed for {}: {}", key, e);
                let error = e.clone();
                self.publish(generation, |s| {
                    s.error = Some(error);
                    s.loading = false;
                });
                Err(e)
            }
        }
    }

    fn arm_stale_timer(self: &Arc<Self>, generation: u64, stale_time: Duration) {
        if stale_time.is_zero() || !self.mounted.load(Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(stale_time).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.publish(generation, |s| s.is_stale = true) {
                return;
            }

            // Revalidate outside this task so re-arming the timer does not
            // abort the task doing the revalidation.
            let key = inner.key.read().clone();
            let options = inner.options.read().clone();
            debug!("Query {} went stale, revalidating", key);
            tokio::spawn(async move {
                let _ = inner.fetch(generation, key, options).await;
            });
        });

        if let Some(previous) = self.stale_timer.lock().replace(handle) {
            previous.abort();
        }
    }
}
