//! The observable cache.
//!
//! [`ObservableCache`] composes the key store, the per-key
//! broadcasters and the configured [`Executor`] into the attach / peek /
//! evict API.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::{Stream, StreamExt, TryFutureExt, future, stream};

use crate::broadcaster::{AttachKind, ErasedState, KeyState, Producer};
use crate::config::CacheConfig;
use crate::error::{BoxError, CacheError, CacheResult, SharedError, share};
use crate::executor::{Executor, TokioExecutor};
use crate::from_cache::FromCache;
use crate::key::CacheKey;
use crate::observer::{
    Attachment, CachedCompletion, CachedSingle, CachedStream, ReplayCompletion, ReplaySingle,
    ReplayStream,
};
use crate::shape::Shape;
use crate::stats::{AtomicCacheStats, CacheStats};
use crate::store::{CacheStore, Eviction};

/// Frozen entry contents handed to the replay handles.
type Snapshot<T> = (CacheKey, Arc<[T]>, Result<(), SharedError>);

struct Inner {
    store: CacheStore,
    executor: Arc<dyn Executor>,
    config: CacheConfig,
    stats: AtomicCacheStats,
}

/// Single-flight cache of asynchronous computations.
///
/// Each key runs its producer at most once. Observers attached before,
/// during or after production all see the same items in the same order and
/// the same terminal outcome. Results persist until [`evict`](Self::evict)
/// or [`clear`](Self::clear).
///
/// Cloning is cheap; clones share the same entries.
///
/// # Examples
///
/// ```
/// use nebula_recall::ObservableCache;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = ObservableCache::new()?;
///
/// let profile = cache.attach_single("profile", || async {
///     Ok::<_, std::io::Error>("ada".to_string())
/// })?;
/// assert_eq!(profile.await?, "ada");
///
/// cache
///     .peek_single::<String>("profile")?
///     .if_present(|replay| assert_eq!(replay.result().ok().map(String::as_str), Some("ada")));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ObservableCache {
    inner: Arc<Inner>,
}

impl ObservableCache {
    /// Cache with the default configuration, running producers on the
    /// current tokio runtime.
    pub fn new() -> CacheResult<Self> {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> ObservableCacheBuilder {
        ObservableCacheBuilder::default()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Attach to a [`Shape::Stream`] key.
    ///
    /// `factory` is invoked only if the key is absent. Otherwise the
    /// observer joins the running producer or replays the settled entry.
    pub fn attach_stream<T, E, S, F>(
        &self,
        key: impl Into<CacheKey>,
        factory: F,
    ) -> CacheResult<CachedStream<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
        S: Stream<Item = Result<T, E>> + Send + 'static,
        F: FnOnce() -> S,
    {
        self.attach_with(key.into(), Shape::Stream, || {
            factory().map(|item| item.map_err(share)).boxed()
        })
        .map(Attachment::into_stream)
    }

    /// Attach to a [`Shape::Single`] key.
    pub fn attach_single<T, E, Fut, F>(
        &self,
        key: impl Into<CacheKey>,
        factory: F,
    ) -> CacheResult<CachedSingle<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        F: FnOnce() -> Fut,
    {
        self.attach_with(key.into(), Shape::Single, || {
            stream::once(factory().map_err(share)).boxed()
        })
        .map(Attachment::into_single)
    }

    /// Attach to a [`Shape::Completion`] key.
    pub fn attach_completion<E, Fut, F>(
        &self,
        key: impl Into<CacheKey>,
        factory: F,
    ) -> CacheResult<CachedCompletion>
    where
        E: Into<BoxError> + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        F: FnOnce() -> Fut,
    {
        self.attach_with::<()>(key.into(), Shape::Completion, || {
            // Success carries no item; only a failure flows through.
            stream::once(factory())
                .filter_map(|result| future::ready(result.err().map(|error| Err(share(error)))))
                .boxed()
        })
        .map(Attachment::into_completion)
    }

    fn attach_with<T>(
        &self,
        key: CacheKey,
        shape: Shape,
        make_producer: impl FnOnce() -> Producer<T>,
    ) -> CacheResult<Attachment<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let (state, created) = self.inner.store.get_or_create::<T>(&key, shape)?;
        // Register before the producer starts so the creator sees every item.
        let (attachment, kind) = state.attach();

        if !created {
            match kind {
                AttachKind::Joined => self.inner.stats.record_join(),
                AttachKind::Replayed => self.inner.stats.record_replay(),
            }
            return Ok(attachment);
        }

        self.run_factory(&key, &state, make_producer);
        Ok(attachment)
    }

    /// Invoke the factory and start its producer on the executor.
    fn run_factory<T>(
        &self,
        key: &CacheKey,
        state: &Arc<KeyState<T>>,
        make_producer: impl FnOnce() -> Producer<T>,
    ) where
        T: Clone + Send + Sync + 'static,
    {
        // Evicted since creation; observers already hold `Evicted`.
        if !state.is_pending() {
            tracing::debug!(key = %key, "entry evicted before its factory ran");
            return;
        }

        self.inner.stats.record_execution();
        match panic::catch_unwind(AssertUnwindSafe(make_producer)) {
            Ok(producer) => state.start(
                producer,
                self.inner.executor.as_ref(),
                self.inner.config.catch_panics,
            ),
            Err(payload) => self.factory_panicked(key, state, payload),
        }
    }

    fn factory_panicked<T>(
        &self,
        key: &CacheKey,
        state: &Arc<KeyState<T>>,
        payload: Box<dyn Any + Send>,
    ) where
        T: Clone + Send + Sync + 'static,
    {
        tracing::warn!(key = %key, "producer factory panicked");
        if self.inner.config.catch_panics {
            state.settle(Err(CacheError::ProducerPanicked { key: key.clone() }.into_shared()));
            return;
        }

        // Only this entry goes; a newer one under the same key is kept.
        let erased: Arc<dyn ErasedState> = Arc::clone(state) as Arc<dyn ErasedState>;
        let eviction = self.inner.store.evict_state(&erased);
        self.record_eviction(eviction);
        panic::resume_unwind(payload);
    }

    /// Settled contents of a [`Shape::Stream`] key.
    ///
    /// Empty for missing and pending keys. Never starts a producer.
    pub fn peek_stream<T>(&self, key: &str) -> CacheResult<FromCache<ReplayStream<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let snapshot = self.snapshot::<T>(key, Shape::Stream)?;
        Ok(snapshot.map(|(key, items, outcome)| ReplayStream::new(key, items, outcome)))
    }

    /// Settled outcome of a [`Shape::Single`] key.
    pub fn peek_single<T>(&self, key: &str) -> CacheResult<FromCache<ReplaySingle<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let snapshot = self.snapshot::<T>(key, Shape::Single)?;
        Ok(snapshot.map(|(key, items, outcome)| ReplaySingle::new(key, &items, outcome)))
    }

    /// Settled outcome of a [`Shape::Completion`] key.
    pub fn peek_completion(&self, key: &str) -> CacheResult<FromCache<ReplayCompletion>> {
        let snapshot = self.snapshot::<()>(key, Shape::Completion)?;
        Ok(snapshot.map(|(key, _, outcome)| ReplayCompletion::new(key, outcome)))
    }

    fn snapshot<T>(&self, key: &str, shape: Shape) -> CacheResult<FromCache<Snapshot<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let snapshot = self.inner.store.get::<T>(key, shape)?.and_then(|state| {
            state
                .snapshot()
                .map(|(items, outcome)| (state.key().clone(), items, outcome))
        });
        self.inner.stats.record_peek(snapshot.is_some());
        Ok(snapshot.into())
    }

    /// Drop `key`. Returns whether it was cached.
    ///
    /// Observers of a pending entry receive [`CacheError::Evicted`]; the
    /// producer is cancelled or orphaned per
    /// [`CacheConfig::eviction_mode`].
    pub fn evict(&self, key: &str) -> bool {
        let eviction = self.inner.store.evict(key);
        self.record_eviction(eviction);
        eviction.was_present()
    }

    /// Evict every key. Returns how many entries were removed.
    pub fn clear(&self) -> usize {
        let evictions = self.inner.store.clear();
        for eviction in &evictions {
            self.record_eviction(*eviction);
        }
        evictions.len()
    }

    fn record_eviction(&self, eviction: Eviction) {
        match eviction {
            Eviction::Absent => {}
            Eviction::Settled => self.inner.stats.record_eviction(false),
            Eviction::Pending { cancelled } => self.inner.stats.record_eviction(cancelled),
        }
    }

    /// Whether `key` has a producer that has not settled yet.
    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.store.is_pending(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.store.contains_key(key)
    }

    /// Shape `key` is cached under, if present.
    pub fn shape_of(&self, key: &str) -> Option<Shape> {
        self.inner.store.shape_of(key)
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner.store.keys()
    }

    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }
}

impl std::fmt::Debug for ObservableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableCache")
            .field("store", &self.inner.store)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ObservableCache`].
#[derive(Default)]
#[must_use = "builders do nothing unless built"]
pub struct ObservableCacheBuilder {
    config: CacheConfig,
    executor: Option<Arc<dyn Executor>>,
}

impl ObservableCacheBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Run producers on `executor` instead of the current tokio runtime.
    pub fn executor(mut self, executor: impl Executor) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Validate the configuration and build.
    ///
    /// Without an explicit executor this must be called from inside a
    /// tokio runtime.
    pub fn build(self) -> CacheResult<ObservableCache> {
        self.config.validate()?;
        let executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(TokioExecutor::current()?),
        };

        Ok(ObservableCache {
            inner: Arc::new(Inner {
                store: CacheStore::new(&self.config),
                executor,
                config: self.config,
                stats: AtomicCacheStats::new(),
            }),
        })
    }
}

impl std::fmt::Debug for ObservableCacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableCacheBuilder")
            .field("config", &self.config)
            .field("executor", &self.executor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    fn cache() -> ObservableCache {
        ObservableCache::new().unwrap()
    }

    #[test]
    fn build_requires_runtime_or_executor() {
        let err = ObservableCache::builder().build().unwrap_err();
        assert_eq!(err, CacheError::NoRuntime);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let cache = ObservableCache::builder()
            .executor(TokioExecutor::new(runtime.handle().clone()))
            .build();
        assert!(cache.is_ok());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let err = ObservableCache::builder()
            .config(CacheConfig::new().with_shard_amount(3))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "RECALL:CONFIG:INVALID");
    }

    #[tokio::test]
    async fn stream_then_replay() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&calls);
        let first = cache
            .attach_stream("numbers", move || {
                counted.fetch_add(1, Ordering::SeqCst);
                stream::iter([Ok::<_, std::io::Error>(1), Ok(2), Ok(3)])
            })
            .unwrap();
        let items: Vec<u32> = first.map(Result::unwrap).collect().await;
        assert_eq!(items, vec![1, 2, 3]);

        let replay = cache
            .attach_stream("numbers", || stream::iter([Ok::<u32, std::io::Error>(9)]))
            .unwrap();
        let items: Vec<u32> = replay.map(Result::unwrap).collect().await;
        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.executions, 1);
        assert_eq!(stats.replays, 1);
    }

    #[tokio::test]
    async fn completion_success_and_peek() {
        let cache = cache();
        assert!(cache.peek_completion("sync").unwrap().is_empty());

        cache
            .attach_completion("sync", || async { Ok::<_, std::io::Error>(()) })
            .unwrap()
            .await
            .unwrap();

        let peeked = cache.peek_completion("sync").unwrap();
        assert!(peeked.as_ref().unwrap().result().is_ok());
        assert_eq!(cache.stats().peek_hits, 1);
        assert_eq!(cache.stats().peek_misses, 1);
    }

    #[tokio::test]
    async fn peek_of_pending_key_is_empty() {
        let cache = cache();
        let (_release, gate) = tokio::sync::oneshot::channel::<()>();
        let _observer = cache
            .attach_single("slow", move || async move {
                let _ = gate.await;
                Ok::<_, std::io::Error>(1u8)
            })
            .unwrap();

        assert!(cache.is_pending("slow"));
        assert!(cache.peek_single::<u8>("slow").unwrap().is_empty());
    }

    #[tokio::test]
    async fn factory_panic_settles_as_failure() {
        let cache = cache();
        let observer = cache
            .attach_single("bad", || -> future::Ready<Result<u8, std::io::Error>> {
                panic!("no producer for you")
            })
            .unwrap();

        let err = observer.await.unwrap_err();
        assert_eq!(err.to_string(), "producer for 'bad' panicked");
        assert!(!cache.is_pending("bad"));
    }

    #[tokio::test]
    async fn factory_is_skipped_for_an_entry_evicted_before_it_ran() {
        let cache = cache();
        let key = CacheKey::from("gone");
        let (state, created) = cache
            .inner
            .store
            .get_or_create::<u8>(&key, Shape::Single)
            .unwrap();
        assert!(created);
        let (observer, _) = state.attach();
        assert!(cache.evict("gone"));

        let invoked = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&invoked);
        cache.run_factory(&key, &state, move || {
            counted.fetch_add(1, Ordering::SeqCst);
            stream::empty().boxed()
        });

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().executions, 0);
        let error = observer.into_single().await.unwrap_err();
        assert_eq!(error.to_string(), "entry 'gone' was evicted before it settled");
    }

    #[tokio::test]
    async fn evict_and_clear_report_presence() {
        let cache = cache();
        cache
            .attach_single("a", || async { Ok::<_, std::io::Error>(1u8) })
            .unwrap()
            .await
            .unwrap();
        cache
            .attach_single("b", || async { Ok::<_, std::io::Error>(2u8) })
            .unwrap()
            .await
            .unwrap();

        assert!(cache.evict("a"));
        assert!(!cache.evict("a"));
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 2);
        assert_eq!(cache.stats().cancellations, 0);
    }
}
