//! Per-key record of one computation's progress and outcome.

use crate::error::SharedError;
use crate::shape::Shape;

/// Terminal status of a cache entry.
///
/// Monotonic: once an entry leaves `Pending` it never changes again.
#[derive(Debug, Clone)]
pub(crate) enum EntryStatus {
    /// The producer is still running.
    Pending,
    /// The producer finished successfully.
    Succeeded,
    /// The producer failed with this error.
    Failed(SharedError),
}

impl EntryStatus {
    #[must_use]
    pub(crate) fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    #[must_use]
    pub(crate) fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    /// The failure, if the entry failed.
    #[must_use]
    pub(crate) fn error(&self) -> Option<&SharedError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// One event on an observer's channel.
#[derive(Debug, Clone)]
pub(crate) enum Signal<T> {
    Item(T),
    Succeeded,
    Failed(SharedError),
}

/// Accumulated state of one cached computation.
#[derive(Debug)]
pub(crate) struct CacheEntry<T> {
    shape: Shape,
    buffer: Vec<T>,
    status: EntryStatus,
}

impl<T> CacheEntry<T> {
    pub(crate) fn new(shape: Shape) -> Self {
        Self {
            shape,
            buffer: Vec::new(),
            status: EntryStatus::Pending,
        }
    }

    /// Items emitted so far, in emission order.
    #[must_use]
    pub(crate) fn items(&self) -> &[T] {
        &self.buffer
    }

    #[must_use]
    pub(crate) fn status(&self) -> &EntryStatus {
        &self.status
    }

    /// Append an emitted item.
    ///
    /// Returns `false` (and keeps the buffer untouched) when the entry has
    /// already settled or the shape's cardinality is exhausted.
    pub(crate) fn push(&mut self, item: T) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if let Some(max) = self.shape.max_items()
            && self.buffer.len() >= max
        {
            return false;
        }
        self.buffer.push(item);
        true
    }

    /// Freeze the entry with its terminal outcome.
    ///
    /// Returns `false` when the entry had already settled.
    pub(crate) fn settle(&mut self, outcome: Result<(), SharedError>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = match outcome {
            Ok(()) => EntryStatus::Succeeded,
            Err(error) => EntryStatus::Failed(error),
        };
        true
    }

    /// The terminal signal, if settled.
    pub(crate) fn terminal_signal(&self) -> Option<Signal<T>> {
        match &self.status {
            EntryStatus::Pending => None,
            EntryStatus::Succeeded => Some(Signal::Succeeded),
            EntryStatus::Failed(error) => Some(Signal::Failed(error.clone())),
        }
    }
}

impl<T: Clone> CacheEntry<T> {
    /// Everything an observer joining now must see first: the buffer, then
    /// the terminal signal when settled.
    pub(crate) fn replay(&self) -> impl Iterator<Item = Signal<T>> + '_ {
        self.buffer
            .iter()
            .cloned()
            .map(Signal::Item)
            .chain(self.terminal_signal())
    }
}
