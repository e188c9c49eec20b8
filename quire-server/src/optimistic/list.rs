//! Optimistic List
//!
//! A locally held ordered collection mutated ahead of server confirmation.
//! Every operation is: apply locally, run the authoritative call, then either
//! reconcile with its result (and invalidate the cache key) or roll back.
//!
//! Rollback restores the snapshot taken right before the operation's own
//! apply. Operations are not serialized, so when two overlap on the same
//! identity the later rollback can discard the other's update.

use parking_lot::Mutex;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::QueryCache;
use crate::core::{QuireError, Result};

/// Items with a natural identity field
pub trait Identifiable {
    type Id: PartialEq + Debug + Send + Sync + 'static;

    fn id(&self) -> Self::Id;
}

type IdentityFn<T, K> = Arc<dyn Fn(&T) -> K + Send + Sync>;

struct ListInner<T, K> {
    items: watch::Sender<Vec<T>>,
    identity: IdentityFn<T, K>,
    cache: Arc<QueryCache>,
    cache_key: Mutex<Option<String>>,
}

pub struct OptimisticList<T, K> {
    inner: Arc<ListInner<T, K>>,
}

impl<T, K> Clone for OptimisticList<T, K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> OptimisticList<T, T::Id>
where
    T: Identifiable + Clone + Send + Sync + 'static,
{
    /// Create a list keyed by [`Identifiable::id`]
    pub fn new(cache: Arc<QueryCache>, initial: Vec<T>) -> Self {
        Self::with_identity(cache, initial, |item: &T| item.id())
    }
}

impl<T, K> OptimisticList<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: PartialEq + Debug + Send + Sync + 'static,
{
    /// Create a list keyed by a custom identity extractor
    pub fn with_identity<F>(cache: Arc<QueryCache>, initial: Vec<T>, identity: F) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        let (items, _) = watch::channel(initial);
        Self {
            inner: Arc::new(ListInner {
                items,
                identity: Arc::new(identity),
                cache,
                cache_key: Mutex::new(None),
            }),
        }
    }

    /// Cache key invalidated after every confirmed mutation
    pub fn invalidates(self, cache_key: impl Into<String>) -> Self {
        *self.inner.cache_key.lock() = Some(cache_key.into());
        self
    }

    pub fn items(&self) -> Vec<T> {
        self.inner.items.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<T>> {
        self.inner.items.subscribe()
    }

    /// Replace the collection with an authoritative load
    pub fn set_items(&self, items: Vec<T>) {
        self.inner.items.send_replace(items);
    }

    pub async fn add_item<F, Fut>(&self, item: T, perform: F) -> Result<T>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let id = self.identity(&item);

        let mut duplicate = false;
        self.inner.items.send_if_modified(|items| {
            if items.iter().any(|existing| (self.inner.identity)(existing) == id) {
                duplicate = true;
                return false;
            }
            items.push(item.clone());
            true
        });
        if duplicate {
            return Err(QuireError::DuplicateIdentity(format!("{:?}", id)));
        }

        match perform(item).await {
            Ok(saved) => {
                self.replace_by_identity(&id, saved.clone());
                self.invalidate().await;
                Ok(saved)
            }
            Err(e) => {
                warn!("Optimistic add of {:?} failed, removing: {}", id, e);
                let identity = &self.inner.identity;
                self.inner
                    .items
                    .send_modify(|items| items.retain(|existing| identity(existing) != id));
                Err(e)
            }
        }
    }

    pub async fn update_item<F, Fut>(&self, item: T, perform: F) -> Result<T>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let id = self.identity(&item);
        let snapshot = self.items();

        if !self.replace_by_identity(&id, item.clone()) {
            return Err(QuireError::ItemNotFound(format!("{:?}", id)));
        }

        match perform(item).await {
            Ok(saved) => {
                self.replace_by_identity(&id, saved.clone());
                self.invalidate().await;
                Ok(saved)
            }
            Err(e) => {
                warn!("Optimistic update of {:?} failed, rolling back: {}", id, e);
                self.inner.items.send_replace(snapshot);
                Err(e)
            }
        }
    }

    pub async fn remove_item<F, Fut>(&self, item: T, perform: F) -> Result<()>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let id = self.identity(&item);
        let snapshot = self.items();

        let identity = &self.inner.identity;
        self.inner
            .items
            .send_modify(|items| items.retain(|existing| identity(existing) != id));

        match perform(item).await {
            Ok(()) => {
                self.invalidate().await;
                Ok(())
            }
            Err(e) => {
                warn!("Optimistic remove of {:?} failed, rolling back: {}", id, e);
                self.inner.items.send_replace(snapshot);
                Err(e)
            }
        }
    }

    pub async fn reorder_items<F, Fut>(&self, new_order: Vec<T>, perform: F) -> Result<()>
    where
        F: FnOnce(Vec<T>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let ids: Vec<K> = new_order.iter().map(|item| self.identity(item)).collect();
        if let Some(dup) = ids
            .iter()
            .enumerate()
            .find(|(i, id)| ids[..*i].contains(id))
            .map(|(_, id)| id)
        {
            return Err(QuireError::DuplicateIdentity(format!("{:?}", dup)));
        }

        let snapshot = self.inner.items.send_replace(new_order.clone());

        match perform(new_order).await {
            Ok(()) => {
                self.invalidate().await;
                Ok(())
            }
            Err(e) => {
                warn!("Optimistic reorder failed, rolling back: {}", e);
                self.inner.items.send_replace(snapshot);
                Err(e)
            }
        }
    }

    fn identity(&self, item: &T) -> K {
        (self.inner.identity)(item)
    }

    /// Swap in `replacement` for the item with identity `id`
    fn replace_by_identity(&self, id: &K, replacement: T) -> bool {
        let identity = &self.inner.identity;
        self.inner.items.send_if_modified(|items| {
            match items.iter_mut().find(|existing| identity(existing) == *id) {
                Some(slot) => {
                    *slot = replacement;
                    true
                }
                None => false,
            }
        })
    }

    async fn invalidate(&self) {
        let key = self.inner.cache_key.lock().clone();
        if let Some(key) = key {
            debug!("Invalidating {} after confirmed mutation", key);
            self.inner.cache.invalidate(&key).await;
        }
    }
}
