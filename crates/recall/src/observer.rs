//! Observer-side handles.
//!
//! `Cached*` handles are what `attach_*` returns: one per observer, fed by
//! the key's broadcaster (or by a replay of the frozen entry). Dropping a
//! handle detaches it; the producer is unaffected.
//!
//! `Replay*` handles are what `peek_*` returns: immutable snapshots of a
//! settled entry that can be inspected directly or subscribed to any number
//! of times.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, ready};

use futures::Stream;
use tokio::sync::mpsc;

use crate::broadcaster::{Detach, ObserverId};
use crate::entry::Signal;
use crate::error::{CacheError, SharedError};
use crate::key::CacheKey;

/// Removes its observer from the broadcaster when dropped.
pub(crate) struct DetachGuard {
    state: Weak<dyn Detach>,
    id: ObserverId,
}

impl DetachGuard {
    pub(crate) fn new(state: Arc<dyn Detach>, id: ObserverId) -> Self {
        Self {
            state: Arc::downgrade(&state),
            id,
        }
    }
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.detach(self.id);
        }
    }
}

impl std::fmt::Debug for DetachGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetachGuard").field("id", &self.id).finish()
    }
}

/// Raw observer registration, before it is given its shape-specific face.
#[derive(Debug)]
pub(crate) struct Attachment<T> {
    key: CacheKey,
    rx: mpsc::UnboundedReceiver<Signal<T>>,
    _detach: Option<DetachGuard>,
}

impl<T> Attachment<T> {
    pub(crate) fn new(
        key: CacheKey,
        rx: mpsc::UnboundedReceiver<Signal<T>>,
        detach: Option<DetachGuard>,
    ) -> Self {
        Self {
            key,
            rx,
            _detach: detach,
        }
    }

    /// Attachment that replays `items` then `outcome`, with no producer
    /// behind it.
    fn replay(key: CacheKey, items: &[T], outcome: &Result<(), SharedError>) -> Self
    where
        T: Clone,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        for item in items {
            let _ = tx.send(Signal::Item(item.clone()));
        }
        let _ = tx.send(match outcome {
            Ok(()) => Signal::Succeeded,
            Err(error) => Signal::Failed(Arc::clone(error)),
        });
        Self::new(key, rx, None)
    }

    pub(crate) fn into_stream(self) -> CachedStream<T> {
        CachedStream {
            attachment: self,
            done: false,
        }
    }

    pub(crate) fn into_single(self) -> CachedSingle<T> {
        CachedSingle {
            attachment: self,
            value: None,
        }
    }
}

impl Attachment<()> {
    pub(crate) fn into_completion(self) -> CachedCompletion {
        CachedCompletion { attachment: self }
    }
}

/// Observer of a [`Shape::Stream`](crate::Shape::Stream) key.
///
/// Yields every item in emission order, then ends. A failure is yielded as
/// a final `Err` item.
#[derive(Debug)]
#[must_use = "streams do nothing unless polled"]
pub struct CachedStream<T> {
    attachment: Attachment<T>,
    done: bool,
}

impl<T> Unpin for CachedStream<T> {}

impl<T> CachedStream<T> {
    /// Key this observer is attached to.
    pub fn key(&self) -> &CacheKey {
        &self.attachment.key
    }

    /// Stop observing. The producer keeps running.
    pub fn detach(self) {}
}

impl<T> Stream for CachedStream<T> {
    type Item = Result<T, SharedError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match ready!(this.attachment.rx.poll_recv(cx)) {
            Some(Signal::Item(item)) => Poll::Ready(Some(Ok(item))),
            Some(Signal::Failed(error)) => {
                this.done = true;
                Poll::Ready(Some(Err(error)))
            }
            Some(Signal::Succeeded) | None => {
                this.done = true;
                Poll::Ready(None)
            }
        }
    }
}

/// Observer of a [`Shape::Single`](crate::Shape::Single) key.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct CachedSingle<T> {
    attachment: Attachment<T>,
    value: Option<T>,
}

// No field is structurally pinned; the buffered value is moved out, never
// borrowed across polls.
impl<T> Unpin for CachedSingle<T> {}

impl<T> CachedSingle<T> {
    pub fn key(&self) -> &CacheKey {
        &self.attachment.key
    }

    /// Stop observing. The producer keeps running.
    pub fn detach(self) {}
}

impl<T> Future for CachedSingle<T> {
    type Output = Result<T, SharedError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match ready!(this.attachment.rx.poll_recv(cx)) {
                Some(Signal::Item(item)) => this.value = Some(item),
                Some(Signal::Failed(error)) => return Poll::Ready(Err(error)),
                Some(Signal::Succeeded) | None => {
                    return Poll::Ready(this.value.take().ok_or_else(|| {
                        CacheError::Incomplete {
                            key: this.attachment.key.clone(),
                        }
                        .into_shared()
                    }));
                }
            }
        }
    }
}

/// Observer of a [`Shape::Completion`](crate::Shape::Completion) key.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct CachedCompletion {
    attachment: Attachment<()>,
}

impl CachedCompletion {
    pub fn key(&self) -> &CacheKey {
        &self.attachment.key
    }

    /// Stop observing. The producer keeps running.
    pub fn detach(self) {}
}

impl Future for CachedCompletion {
    type Output = Result<(), SharedError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match ready!(this.attachment.rx.poll_recv(cx)) {
                Some(Signal::Item(())) => {}
                Some(Signal::Failed(error)) => return Poll::Ready(Err(error)),
                Some(Signal::Succeeded) => return Poll::Ready(Ok(())),
                None => {
                    return Poll::Ready(Err(CacheError::Incomplete {
                        key: this.attachment.key.clone(),
                    }
                    .into_shared()));
                }
            }
        }
    }
}

/// Settled [`Shape::Stream`](crate::Shape::Stream) entry.
#[derive(Debug, Clone)]
pub struct ReplayStream<T> {
    key: CacheKey,
    items: Arc<[T]>,
    outcome: Result<(), SharedError>,
}

impl<T: Clone> ReplayStream<T> {
    pub(crate) fn new(key: CacheKey, items: Arc<[T]>, outcome: Result<(), SharedError>) -> Self {
        Self {
            key,
            items,
            outcome,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Every item the producer emitted, in order.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// The producer's failure, if it failed.
    pub fn error(&self) -> Option<&SharedError> {
        self.outcome.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// A fresh observer replaying the items then the terminal.
    pub fn subscribe(&self) -> CachedStream<T> {
        Attachment::replay(self.key.clone(), &self.items, &self.outcome).into_stream()
    }
}

/// Settled [`Shape::Single`](crate::Shape::Single) entry.
#[derive(Debug, Clone)]
pub struct ReplaySingle<T> {
    key: CacheKey,
    result: Result<T, SharedError>,
}

impl<T: Clone> ReplaySingle<T> {
    pub(crate) fn new(key: CacheKey, items: &[T], outcome: Result<(), SharedError>) -> Self {
        let result = outcome.and_then(|()| {
            items.first().cloned().ok_or_else(|| {
                CacheError::Incomplete { key: key.clone() }.into_shared()
            })
        });
        Self { key, result }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The settled value or failure.
    pub fn result(&self) -> Result<&T, &SharedError> {
        self.result.as_ref()
    }

    /// A fresh observer resolving to the settled outcome.
    pub fn subscribe(&self) -> CachedSingle<T> {
        let attachment = match &self.result {
            Ok(value) => Attachment::replay(self.key.clone(), std::slice::from_ref(value), &Ok(())),
            Err(error) => Attachment::replay(self.key.clone(), &[], &Err(Arc::clone(error))),
        };
        attachment.into_single()
    }
}

/// Settled [`Shape::Completion`](crate::Shape::Completion) entry.
#[derive(Debug, Clone)]
pub struct ReplayCompletion {
    key: CacheKey,
    outcome: Result<(), SharedError>,
}

impl ReplayCompletion {
    pub(crate) fn new(key: CacheKey, outcome: Result<(), SharedError>) -> Self {
        Self { key, outcome }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn result(&self) -> Result<(), &SharedError> {
        self.outcome.as_ref().map(|_| ())
    }

    /// A fresh observer resolving to the settled outcome.
    pub fn subscribe(&self) -> CachedCompletion {
        Attachment::replay(self.key.clone(), &[], &self.outcome).into_completion()
    }
}
