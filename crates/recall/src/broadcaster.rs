//! Single-flight execution and fan-out for one key.
//!
//! A [`KeyState`] pairs the key's [`CacheEntry`] with its
//! [`EntryBroadcaster`] under one mutex. Every mutation (buffer append,
//! fan-out, observer registration, settle) happens inside that critical
//! section, which is what makes the replay-then-live join seamless: an
//! observer registering between two emissions sees the first through the
//! replay and the second through its live channel, never both and never
//! neither.

use std::any::{Any, TypeId};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::entry::{CacheEntry, EntryStatus, Signal};
use crate::error::{CacheError, SharedError};
use crate::executor::Executor;
use crate::key::CacheKey;
use crate::observer::{Attachment, DetachGuard};
use crate::shape::Shape;

/// Producer output adapted to the uniform item stream.
pub(crate) type Producer<T> = BoxStream<'static, Result<T, SharedError>>;

/// Identifies one attached observer within its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObserverId(u64);

/// How an attach was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttachKind {
    /// Joined a running producer (replay so far, then live).
    Joined,
    /// Served entirely from the frozen entry.
    Replayed,
}

/// Live fan-out for a pending entry.
///
/// Dropped as soon as the entry settles; dropping it closes every
/// observer channel right after the terminal signal was queued.
#[derive(Debug)]
pub(crate) struct EntryBroadcaster<T> {
    observers: Vec<(ObserverId, mpsc::UnboundedSender<Signal<T>>)>,
    next_id: u64,
    cancel: CancellationToken,
}

impl<T: Clone> EntryBroadcaster<T> {
    fn new() -> Self {
        Self {
            observers: Vec::new(),
            next_id: 0,
            cancel: CancellationToken::new(),
        }
    }

    fn register(&mut self, tx: mpsc::UnboundedSender<Signal<T>>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, tx));
        id
    }

    fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        before != self.observers.len()
    }

    /// Deliver to every observer, pruning the ones whose receiver is gone.
    fn fan_out(&mut self, signal: &Signal<T>) {
        self.observers
            .retain(|(_, tx)| tx.send(signal.clone()).is_ok());
    }
}

struct KeyInner<T> {
    entry: CacheEntry<T>,
    broadcaster: Option<EntryBroadcaster<T>>,
}

/// Entry plus broadcaster for one key, shared between the store, the
/// producer task and observers' detach guards.
pub(crate) struct KeyState<T> {
    key: CacheKey,
    shape: Shape,
    inner: Mutex<KeyInner<T>>,
}

impl<T> KeyState<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(key: CacheKey, shape: Shape) -> Self {
        Self {
            key,
            shape,
            inner: Mutex::new(KeyInner {
                entry: CacheEntry::new(shape),
                broadcaster: Some(EntryBroadcaster::new()),
            }),
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.inner.lock().broadcaster.is_some()
    }

    /// Register an observer: replay whatever is buffered, then either join
    /// live delivery (pending) or close after the terminal (settled).
    pub(crate) fn attach(self: &Arc<Self>) -> (Attachment<T>, AttachKind) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let KeyInner { entry, broadcaster } = &mut *inner;

        for signal in entry.replay() {
            // The receiver is still in hand, sends cannot fail here.
            let _ = tx.send(signal);
        }

        match broadcaster {
            Some(broadcaster) => {
                let id = broadcaster.register(tx);
                tracing::trace!(
                    key = %self.key,
                    replayed = entry.items().len(),
                    observers = broadcaster.observers.len(),
                    "observer joined pending entry"
                );
                let detach = DetachGuard::new(Arc::clone(self) as Arc<dyn Detach>, id);
                (
                    Attachment::new(self.key.clone(), rx, Some(detach)),
                    AttachKind::Joined,
                )
            }
            None => {
                tracing::trace!(key = %self.key, items = entry.items().len(), "replaying settled entry");
                (
                    Attachment::new(self.key.clone(), rx, None),
                    AttachKind::Replayed,
                )
            }
        }
    }

    /// Frozen contents of a settled entry; `None` while pending.
    pub(crate) fn snapshot(&self) -> Option<(Arc<[T]>, Result<(), SharedError>)> {
        let inner = self.inner.lock();
        let outcome = match inner.entry.status() {
            EntryStatus::Pending => return None,
            EntryStatus::Succeeded => Ok(()),
            EntryStatus::Failed(error) => Err(Arc::clone(error)),
        };
        Some((Arc::from(inner.entry.items()), outcome))
    }

    /// Append and fan out one item. Returns `false` when it was dropped
    /// because the entry already settled or the shape admits no more items.
    fn emit(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        let KeyInner { entry, broadcaster } = &mut *inner;

        if !entry.push(item) {
            return false;
        }
        if let (Some(broadcaster), Some(last)) = (broadcaster.as_mut(), entry.items().last()) {
            broadcaster.fan_out(&Signal::Item(last.clone()));
        }
        true
    }

    /// Freeze the entry and release the broadcaster. Returns `false` when
    /// the entry had already settled.
    pub(crate) fn settle(&self, outcome: Result<(), SharedError>) -> bool {
        let mut inner = self.inner.lock();
        if !inner.entry.settle(outcome) {
            return false;
        }

        if let Some(mut broadcaster) = inner.broadcaster.take()
            && let Some(signal) = inner.entry.terminal_signal()
        {
            broadcaster.fan_out(&signal);
            tracing::debug!(
                key = %self.key,
                shape = %self.shape,
                items = inner.entry.items().len(),
                observers = broadcaster.observers.len(),
                failed = inner.entry.status().error().is_some(),
                "entry settled"
            );
        }
        true
    }

    /// Token that stops the running producer; `None` once settled.
    pub(crate) fn cancel_token(&self) -> Option<CancellationToken> {
        self.inner
            .lock()
            .broadcaster
            .as_ref()
            .map(|broadcaster| broadcaster.cancel.clone())
    }

    /// Spawn the producer on `executor`. Called once, by the attach that
    /// created this state.
    pub(crate) fn start(
        self: &Arc<Self>,
        producer: Producer<T>,
        executor: &dyn Executor,
        catch_panics: bool,
    ) {
        let Some(cancel) = self.cancel_token() else {
            // Torn down between creation and start.
            return;
        };

        tracing::debug!(key = %self.key, shape = %self.shape, "starting producer");
        let state = Arc::clone(self);
        executor.spawn(
            async move {
                let key = state.key.clone();
                let guarded = AssertUnwindSafe(Arc::clone(&state).drive(producer)).catch_unwind();
                if let Some(Err(payload)) = cancel.run_until_cancelled(guarded).await {
                    tracing::warn!(key = %key, "producer panicked");
                    // Observers are released before the panic goes anywhere.
                    state.settle(Err(CacheError::ProducerPanicked { key }.into_shared()));
                    if !catch_panics {
                        panic::resume_unwind(payload);
                    }
                }
            }
            .boxed(),
        );
    }

    async fn drive(self: Arc<Self>, mut producer: Producer<T>) {
        while let Some(next) = producer.next().await {
            match next {
                Ok(item) => {
                    // After an orphaning eviction the producer keeps running
                    // and its output is discarded here.
                    self.emit(item);
                }
                Err(error) => {
                    self.settle(Err(error));
                    return;
                }
            }
        }
        self.settle(Ok(()));
    }
}

/// Observer removal, erased over the item type for [`DetachGuard`].
pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: ObserverId);
}

impl<T> Detach for KeyState<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn detach(&self, id: ObserverId) {
        let mut inner = self.inner.lock();
        if let Some(broadcaster) = inner.broadcaster.as_mut()
            && broadcaster.remove(id)
        {
            tracing::trace!(
                key = %self.key,
                observers = broadcaster.observers.len(),
                "observer detached; producer keeps running"
            );
        }
    }
}

/// Type-erased view of a [`KeyState`] so entries of different item types
/// share one map.
pub(crate) trait ErasedState: Send + Sync {
    /// Access the concrete state as `Arc<dyn Any>` for downcasting.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn key(&self) -> &CacheKey;

    fn shape(&self) -> Shape;

    fn item_type(&self) -> TypeId;

    fn item_type_name(&self) -> &'static str;

    fn is_pending(&self) -> bool;

    /// Settle a pending entry as evicted and hand back its producer's
    /// cancellation token. `None` if the entry had already settled.
    fn tear_down(&self) -> Option<CancellationToken>;
}

impl<T> ErasedState for KeyState<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn key(&self) -> &CacheKey {
        &self.key
    }

    fn shape(&self) -> Shape {
        self.shape
    }

    fn item_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn item_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn is_pending(&self) -> bool {
        KeyState::is_pending(self)
    }

    fn tear_down(&self) -> Option<CancellationToken> {
        let cancel = self.cancel_token()?;
        let evicted = CacheError::Evicted {
            key: self.key.clone(),
        };
        self.settle(Err(evicted.into_shared())).then_some(cancel)
    }
}
