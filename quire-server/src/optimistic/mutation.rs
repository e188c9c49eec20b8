//! Optimistic Mutation
//!
//! Single-shot version of the optimistic pattern for mutations without a list
//! shape: run an optional local effect, call the mutation, then either
//! invalidate the affected cache keys or undo the local effect.
//!
//! `on_settled` runs last on every path, including when the `mutate` future
//! is dropped before completion. Overlapping `mutate` calls are allowed;
//! `loading` stays set until the last of them settles.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::QueryCache;
use crate::core::{QuireError, Result};

type MutationFn<D, R> = Arc<dyn Fn(D) -> BoxFuture<'static, Result<R>> + Send + Sync>;
type Effect<D> = Arc<dyn Fn(&D) + Send + Sync>;
type SuccessHook<D, R> = Arc<dyn Fn(&R, &D) + Send + Sync>;
type ErrorHook<D> = Arc<dyn Fn(&QuireError, &D) + Send + Sync>;
type SettledHook = Arc<dyn Fn() + Send + Sync>;

/// Observable state of a mutation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationState {
    pub loading: bool,
    pub error: Option<QuireError>,
}

pub struct OptimisticMutation<D, R> {
    cache: Arc<QueryCache>,
    mutation: MutationFn<D, R>,
    optimistic_update: Option<Effect<D>>,
    rollback_update: Option<Effect<D>>,
    on_success: Option<SuccessHook<D, R>>,
    on_error: Option<ErrorHook<D>>,
    on_settled: Option<SettledHook>,
    invalidate_keys: Vec<String>,
    state: watch::Sender<MutationState>,
    in_flight: AtomicUsize,
}

impl<D, R> OptimisticMutation<D, R>
where
    D: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new<F, Fut>(cache: Arc<QueryCache>, mutation: F) -> Self
    where
        F: Fn(D) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let (state, _) = watch::channel(MutationState::default());
        Self {
            cache,
            mutation: Arc::new(move |data| -> BoxFuture<'static, Result<R>> {
                Box::pin(mutation(data))
            }),
            optimistic_update: None,
            rollback_update: None,
            on_success: None,
            on_error: None,
            on_settled: None,
            invalidate_keys: Vec::new(),
            state,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn optimistic_update(mut self, f: impl Fn(&D) + Send + Sync + 'static) -> Self {
        self.optimistic_update = Some(Arc::new(f));
        self
    }

    pub fn rollback_update(mut self, f: impl Fn(&D) + Send + Sync + 'static) -> Self {
        self.rollback_update = Some(Arc::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn(&R, &D) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&QuireError, &D) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_settled(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_settled = Some(Arc::new(f));
        self
    }

    pub fn invalidate_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidate_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn state(&self) -> MutationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationState> {
        self.state.subscribe()
    }

    /// Clear a recorded error
    pub fn reset(&self) {
        self.state.send_modify(|s| s.error = None);
    }

    pub async fn mutate(&self, data: D) -> Result<R> {
        self.state.send_modify(|s| {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            s.loading = true;
            s.error = None;
        });
        let _settle = SettleGuard {
            state: &self.state,
            in_flight: &self.in_flight,
            on_settled: self.on_settled.clone(),
        };

        if let Some(apply) = &self.optimistic_update {
            apply(&data);
        }

        match (self.mutation)(data.clone()).await {
            Ok(result) => {
                if let Some(on_success) = &self.on_success {
                    on_success(&result, &data);
                }
                if !self.invalidate_keys.is_empty() {
                    debug!("Mutation succeeded, invalidating {:?}", self.invalidate_keys);
                    self.cache.invalidate_many(&self.invalidate_keys).await;
                }
                Ok(result)
            }
            Err(e) => {
                warn!("Mutation failed, rolling back: {}", e);
                if let Some(rollback) = &self.rollback_update {
                    rollback(&data);
                }
                let error = e.clone();
                self.state.send_modify(|s| s.error = Some(error));
                if let Some(on_error) = &self.on_error {
                    on_error(&e, &data);
                }
                Err(e)
            }
        }
    }
}

/// Runs `on_settled` when the mutation finishes or is dropped, clearing
/// `loading` once no other call is in flight
struct SettleGuard<'a> {
    state: &'a watch::Sender<MutationState>,
    in_flight: &'a AtomicUsize,
    on_settled: Option<SettledHook>,
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        let in_flight = self.in_flight;
        self.state.send_modify(|s| {
            let remaining = in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
            s.loading = remaining > 0;
        });
        if let Some(on_settled) = &self.on_settled {
            on_settled();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryCacheConfig;
    use crate::core::{Backend, system_clock};
    use parking_lot::Mutex;
    use std::time::Duration;

    fn cache() -> Arc<QueryCache> {
        Arc::new(QueryCache::volatile(&QueryCacheConfig::default(), system_clock()))
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |event: &str| sink.lock().push(event.to_string()))
    }

    #[tokio::test]
    async fn test_success_invalidates_and_settles_last() {
        let cache = cache();
        cache.set("profile:7", &"old", None, Backend::Memory).await;
        cache.set("feed", &"old", None, Backend::Durable).await;

        let (log, record) = recorder();
        let (r1, r2, r3, r4) = (record.clone(), record.clone(), record.clone(), record);

        let mutation = OptimisticMutation::new(cache.clone(), |name: String| async move {
            Ok(format!("saved {name}"))
        })
        .optimistic_update(move |_| r1("optimistic"))
        .rollback_update(move |_| r2("rollback"))
        .on_success(move |_, _| r3("success"))
        .on_settled(move || r4("settled"))
        .invalidate_keys(["profile:7", "feed"]);

        let result = mutation.mutate("ada".to_string()).await.unwrap();

        assert_eq!(result, "saved ada");
        assert_eq!(*log.lock(), vec!["optimistic", "success", "settled"]);
        assert_eq!(mutation.state(), MutationState::default());
        assert_eq!(cache.get::<String>("profile:7", Backend::Memory).await, None);
        assert_eq!(cache.get::<String>("feed", Backend::Durable).await, None);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_records_error() {
        let cache = cache();
        cache.set("feed", &"kept", None, Backend::Memory).await;

        let (log, record) = recorder();
        let (r1, r2, r3, r4) = (record.clone(), record.clone(), record.clone(), record);

        let mutation = OptimisticMutation::new(cache.clone(), |_: u32| async {
            Err::<(), _>(QuireError::MutationFailed("conflict".into()))
        })
        .optimistic_update(move |_| r1("optimistic"))
        .rollback_update(move |_| r2("rollback"))
        .on_error(move |_, _| r3("error"))
        .on_settled(move || r4("settled"))
        .invalidate_keys(["feed"]);

        let err = mutation.mutate(1).await.unwrap_err();

        assert_eq!(err, QuireError::MutationFailed("conflict".into()));
        assert_eq!(
            *log.lock(),
            vec!["optimistic", "rollback", "error", "settled"]
        );
        let state = mutation.state();
        assert!(!state.loading);
        assert_eq!(state.error, Some(err));
        assert_eq!(
            cache.get::<String>("feed", Backend::Memory).await.as_deref(),
            Some("kept")
        );

        mutation.reset();
        assert_eq!(mutation.state().error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_visible_while_in_flight() {
        let mutation = OptimisticMutation::new(cache(), |_: ()| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, QuireError>(())
        });
        let mut rx = mutation.subscribe();

        let pending = mutation.mutate(());
        tokio::pin!(pending);

        tokio::select! {
            _ = &mut pending => panic!("mutation finished too early"),
            changed = rx.changed() => changed.unwrap(),
        }
        assert!(rx.borrow().loading);

        pending.await.unwrap();
        assert!(!mutation.state().loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_mutation_still_settles() {
        let (log, record) = recorder();
        let mutation = OptimisticMutation::new(cache(), |_: ()| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, QuireError>(())
        })
        .on_settled(move || record("settled"));

        let _ = tokio::time::timeout(Duration::from_millis(10), mutation.mutate(())).await;

        assert_eq!(*log.lock(), vec!["settled"]);
        assert!(!mutation.state().loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_mutations_keep_loading_until_last_settles() {
        let mutation = OptimisticMutation::new(cache(), |delay_ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok::<_, QuireError>(delay_ms)
        });

        let slow = mutation.mutate(100);
        tokio::pin!(slow);

        tokio::select! {
            _ = &mut slow => panic!("slow mutation finished first"),
            fast = mutation.mutate(10) => assert_eq!(fast.unwrap(), 10),
        }
        assert!(mutation.state().loading);

        assert_eq!(slow.await.unwrap(), 100);
        assert!(!mutation.state().loading);
    }
}
