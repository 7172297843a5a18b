//! Execution context for producers.
//!
//! Producers never run on the attaching caller's stack: the cache hands
//! each one to an [`Executor`] supplied at construction. Delivery to
//! observers happens wherever the observer polls its handle.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::Handle;

use crate::error::{CacheError, CacheResult};

/// Spawns producer tasks.
pub trait Executor: Send + Sync + 'static {
    /// Run `task` to completion in the background.
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        (**self).spawn(task);
    }
}

/// [`Executor`] backed by a tokio runtime handle.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor for the runtime the caller is running on.
    pub fn current() -> CacheResult<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| CacheError::NoRuntime)
    }

    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Executor for TokioExecutor {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        // Producers are tracked through their key state, not the join handle.
        drop(self.handle.spawn(task));
    }
}
