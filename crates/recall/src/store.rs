//! Key → entry map.
//!
//! Entries of different item types live side by side behind the
//! [`ErasedState`] trait object; typed access goes through a shape check, a
//! `TypeId` check and a downcast, in that order. Per-key work never takes a
//! lock wider than the key's `DashMap` shard, except `clear`, which holds an
//! exclusive gate so its snapshot-then-tear-down cannot interleave with
//! entry creation or eviction.

use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;

use crate::broadcaster::{ErasedState, KeyState};
use crate::config::{CacheConfig, EvictionMode};
use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::shape::Shape;

/// Outcome of evicting one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// The key was not cached.
    Absent,
    /// A settled entry was dropped.
    Settled,
    /// A pending entry was torn down; `cancelled` tells whether its
    /// producer was stopped or left to run orphaned.
    Pending { cancelled: bool },
}

impl Eviction {
    #[must_use]
    pub fn was_present(self) -> bool {
        !matches!(self, Self::Absent)
    }
}

/// Thread-safe mapping from key to entry state.
pub struct CacheStore {
    entries: DashMap<CacheKey, Arc<dyn ErasedState>>,
    /// Shared by creation and eviction, exclusive for `clear`.
    gate: RwLock<()>,
    eviction_mode: EvictionMode,
}

impl CacheStore {
    pub(crate) fn new(config: &CacheConfig) -> Self {
        let entries = match config.shard_amount {
            Some(shards) => {
                DashMap::with_capacity_and_shard_amount(config.initial_capacity, shards)
            }
            None => DashMap::with_capacity(config.initial_capacity),
        };

        Self {
            entries,
            gate: RwLock::new(()),
            eviction_mode: config.eviction_mode,
        }
    }

    /// Look up `key`, creating a pending entry if it is absent.
    ///
    /// Exactly one of any number of concurrent callers for the same absent
    /// key gets `created == true`; that caller owns starting the producer.
    pub(crate) fn get_or_create<T>(
        &self,
        key: &CacheKey,
        shape: Shape,
    ) -> CacheResult<(Arc<KeyState<T>>, bool)>
    where
        T: Clone + Send + Sync + 'static,
    {
        let _gate = self.gate.read();
        match self.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                let state = downcast::<T>(Arc::clone(occupied.get()), shape)?;
                Ok((state, false))
            }
            Entry::Vacant(vacant) => {
                let state = Arc::new(KeyState::<T>::new(key.clone(), shape));
                vacant.insert(Arc::clone(&state) as Arc<dyn ErasedState>);
                tracing::debug!(key = %key, shape = %shape, "created cache entry");
                Ok((state, true))
            }
        }
    }

    /// Typed lookup that never creates.
    pub(crate) fn get<T>(&self, key: &str, shape: Shape) -> CacheResult<Option<Arc<KeyState<T>>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        // Clone the Arc so the shard lock is released before downcasting.
        let Some(state) = self.entries.get(key).map(|entry| Arc::clone(entry.value())) else {
            return Ok(None);
        };
        downcast::<T>(state, shape).map(Some)
    }

    /// Remove `key`. A pending entry is torn down: its observers get
    /// [`CacheError::Evicted`] and its producer is cancelled or orphaned per
    /// the configured [`EvictionMode`].
    pub fn evict(&self, key: &str) -> Eviction {
        let removed = {
            let _gate = self.gate.read();
            self.entries.remove(key)
        };

        match removed {
            None => Eviction::Absent,
            Some((key, state)) => {
                let eviction = self.tear_down(state.as_ref());
                tracing::debug!(key = %key, ?eviction, "evicted cache entry");
                eviction
            }
        }
    }

    /// Remove `state` only if it is still the entry mapped under its key.
    ///
    /// A newer entry created for the same key after `state` was evicted is
    /// left alone and `Eviction::Absent` is returned.
    pub(crate) fn evict_state(&self, state: &Arc<dyn ErasedState>) -> Eviction {
        let removed = {
            let _gate = self.gate.read();
            self.entries
                .remove_if(state.key(), |_, current| Arc::ptr_eq(current, state))
        };
        if removed.is_none() {
            return Eviction::Absent;
        }

        let eviction = self.tear_down(state.as_ref());
        tracing::debug!(key = %state.key(), ?eviction, "evicted cache entry");
        eviction
    }

    /// Evict every key. Returns one [`Eviction`] per removed entry.
    pub fn clear(&self) -> Vec<Eviction> {
        let _gate = self.gate.write();
        let snapshot: Vec<Arc<dyn ErasedState>> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.entries.clear();

        let evictions: Vec<_> = snapshot
            .iter()
            .map(|state| self.tear_down(state.as_ref()))
            .collect();
        tracing::debug!(
            entries = evictions.len(),
            pending = evictions
                .iter()
                .filter(|e| matches!(e, Eviction::Pending { .. }))
                .count(),
            "cleared cache"
        );
        evictions
    }

    fn tear_down(&self, state: &dyn ErasedState) -> Eviction {
        match state.tear_down() {
            None => Eviction::Settled,
            Some(cancel) => {
                let cancelled = self.eviction_mode == EvictionMode::Cancel;
                if cancelled {
                    cancel.cancel();
                } else {
                    tracing::debug!(key = %state.key(), "orphaning running producer");
                }
                Eviction::Pending { cancelled }
            }
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether `key` is cached and its producer has not settled yet.
    pub fn is_pending(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .is_some_and(|state| state.is_pending())
    }

    /// Shape `key` is cached under, if present.
    pub fn shape_of(&self, key: &str) -> Option<Shape> {
        self.entries.get(key).map(|entry| entry.value().shape())
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("eviction_mode", &self.eviction_mode)
            .finish()
    }
}

fn downcast<T>(state: Arc<dyn ErasedState>, shape: Shape) -> CacheResult<Arc<KeyState<T>>>
where
    T: Clone + Send + Sync + 'static,
{
    if state.shape() != shape {
        return Err(CacheError::ShapeMismatch {
            key: state.key().clone(),
            stored: state.shape(),
            requested: shape,
        });
    }

    let mismatch = |state: &dyn ErasedState| CacheError::TypeMismatch {
        key: state.key().clone(),
        stored: state.item_type_name(),
        requested: std::any::type_name::<T>(),
    };
    if state.item_type() != TypeId::of::<T>() {
        return Err(mismatch(state.as_ref()));
    }

    let error = mismatch(state.as_ref());
    state.as_any().downcast::<KeyState<T>>().map_err(|_| error)
}
