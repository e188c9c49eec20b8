//! Paged Query
//!
//! Cache-first pagination. Page `n` of a query lives under its own cache key
//! (`"{base}:page:{n}"`). Pages are appended monotonically; a page shorter
//! than the configured page size is the only exhaustion signal.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::QueryCache;
use crate::core::{Backend, QuireError, Result};

/// Page fetch function, invoked with a 1-based page number
pub type PageFetcher<T> = Arc<dyn Fn(u32) -> BoxFuture<'static, Result<Vec<T>>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PagedOptions {
    pub page_size: usize,
    pub cache_ttl: Option<Duration>,
    pub backend: Backend,
    pub enabled: bool,
}

impl Default for PagedOptions {
    fn default() -> Self {
        Self {
            page_size: 20,
            cache_ttl: None,
            backend: Backend::Memory,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PagedState<T> {
    pub items: Vec<T>,
    /// Next page to load
    pub page: u32,
    pub has_more: bool,
    pub loading: bool,
    pub error: Option<QuireError>,
}

impl<T> Default for PagedState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            page: 1,
            has_more: true,
            loading: false,
            error: None,
        }
    }
}

struct PagedInner<T> {
    cache: Arc<QueryCache>,
    base_key: String,
    fetcher: PageFetcher<T>,
    options: PagedOptions,
    state: watch::Sender<PagedState<T>>,
    /// Bumped by `refresh` so loads started before it are dropped
    generation: Mutex<u64>,
}

pub struct PagedQuery<T> {
    inner: Arc<PagedInner<T>>,
}

impl<T> Clone for PagedQuery<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PagedQuery<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create the query; no page is loaded until `load_more` or `refresh`
    ///
    /// A zero page size is rejected: no page could ever be short, so the
    /// query would never exhaust.
    pub fn new<F, Fut>(
        cache: Arc<QueryCache>,
        base_key: impl Into<String>,
        fetch: F,
        options: PagedOptions,
    ) -> Result<Self>
    where
        F: Fn(u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
    {
        if options.page_size == 0 {
            return Err(QuireError::InvalidValue(
                "page_size must be positive".to_string(),
            ));
        }

        let fetcher: PageFetcher<T> =
            Arc::new(move |page| -> BoxFuture<'static, Result<Vec<T>>> { Box::pin(fetch(page)) });
        let (state, _) = watch::channel(PagedState::default());

        Ok(Self {
            inner: Arc::new(PagedInner {
                cache,
                base_key: base_key.into(),
                fetcher,
                options,
                state,
                generation: Mutex::new(0),
            }),
        })
    }

    /// Cache key for a given page
    pub fn page_key(&self, page: u32) -> String {
        format!("{}:page:{}", self.inner.base_key, page)
    }

    pub fn state(&self) -> PagedState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PagedState<T>> {
        self.inner.state.subscribe()
    }

    /// Load the next page
    ///
    /// No-op when disabled, already loading, or exhausted.
    pub async fn load_more(&self) {
        if !self.inner.options.enabled {
            return;
        }

        // Check-and-set under the generation lock so concurrent callers
        // cannot both start the same page.
        let (generation, page) = {
            let generation = self.inner.generation.lock();
            let mut claimed = None;
            self.inner.state.send_if_modified(|s| {
                if s.loading || !s.has_more {
                    return false;
                }
                s.loading = true;
                claimed = Some(s.page);
                true
            });
            match claimed {
                Some(page) => (*generation, page),
                None => return,
            }
        };

        let key = self.page_key(page);
        let options = &self.inner.options;

        let loaded = match self.inner.cache.get::<Vec<T>>(&key, options.backend).await {
            Some(items) => {
                debug!("Page cache hit: {}", key);
                Ok(items)
            }
            None => match (self.inner.fetcher)(page).await {
                Ok(items) => {
                    if self.is_current(generation) {
                        self.inner
                            .cache
                            .set(&key, &items, options.cache_ttl, options.backend)
                            .await;
                    }
                    Ok(items)
                }
                Err(e) => Err(e),
            },
        };

        let page_size = options.page_size;
        let generation_guard = self.inner.generation.lock();
        if *generation_guard != generation {
            debug!("Discarding page {} of {} loaded before refresh", page, self.inner.base_key);
            return;
        }

        self.inner.state.send_modify(|s| {
            s.loading = false;
            match loaded {
                Ok(items) => {
                    s.has_more = items.len() >= page_size;
                    s.items.extend(items);
                    s.page = page + 1;
                    s.error = None;
                }
                Err(e) => {
                    warn!("Failed to load page {} of {}: {}", page, self.inner.base_key, e);
                    s.error = Some(e);
                }
            }
        });
    }

    /// Drop everything loaded so far and load the first page again
    pub async fn refresh(&self) {
        {
            let mut generation = self.inner.generation.lock();
            *generation += 1;
            self.inner.state.send_replace(PagedState::default());
        }
        self.load_more().await;
    }

    /// Evict every page loaded so far from all cache backends
    pub async fn invalidate_loaded_pages(&self) {
        let last_page = self.state().page;
        let keys: Vec<String> = (1..last_page).map(|page| self.page_key(page)).collect();
        self.inner.cache.invalidate_many(keys).await;
    }

    fn is_current(&self, generation: u64) -> bool {
        *self.inner.generation.lock() == generation
    }
}
