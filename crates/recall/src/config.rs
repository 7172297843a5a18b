//! Configuration for the observable cache

use crate::error::{CacheError, CacheResult};

/// What happens to a still-running producer when its entry is evicted
/// (directly, or through `clear`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum EvictionMode {
    /// Stop polling the producer; its future or stream is dropped.
    #[default]
    Cancel,
    /// Let the producer run to completion and discard whatever it yields.
    Orphan,
}

/// Configuration for [`ObservableCache`](crate::ObservableCache)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheConfig {
    /// Number of keys to pre-allocate room for
    pub initial_capacity: usize,
    /// Shard count of the key map; must be a power of two greater than 1
    pub shard_amount: Option<usize>,
    /// Fate of pending producers on eviction
    pub eviction_mode: EvictionMode,
    /// Swallow producer panics once they are settled as failed; when off the
    /// panic is resumed on the executor (or on the caller, for a factory)
    pub catch_panics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 64,
            shard_amount: None,
            eviction_mode: EvictionMode::default(),
            catch_panics: true,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial capacity hint
    #[must_use = "builder methods must be chained or built"]
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Set the key map shard count
    #[must_use = "builder methods must be chained or built"]
    pub fn with_shard_amount(mut self, shards: usize) -> Self {
        self.shard_amount = Some(shards);
        self
    }

    /// Set the eviction mode
    #[must_use = "builder methods must be chained or built"]
    pub fn with_eviction_mode(mut self, mode: EvictionMode) -> Self {
        self.eviction_mode = mode;
        self
    }

    /// Resume producer panics after settling the entry as failed
    #[must_use = "builder methods must be chained or built"]
    pub fn without_panic_capture(mut self) -> Self {
        self.catch_panics = false;
        self
    }

    /// Preset for a view layer: a handful of keys, eviction cancels work
    /// nobody will ever look at again.
    #[must_use]
    pub fn for_ui() -> Self {
        Self::new()
            .with_initial_capacity(16)
            .with_eviction_mode(EvictionMode::Cancel)
    }

    /// Preset for background work whose side effects must finish even when
    /// the cached result is dropped.
    #[must_use]
    pub fn for_background() -> Self {
        Self::new()
            .with_initial_capacity(256)
            .with_eviction_mode(EvictionMode::Orphan)
    }

    /// Validate the configuration
    pub fn validate(&self) -> CacheResult<()> {
        if let Some(shards) = self.shard_amount
            && (shards < 2 || !shards.is_power_of_two())
        {
            return Err(CacheError::invalid_config(format!(
                "shard_amount must be a power of two greater than 1, got {shards}"
            )));
        }

        Ok(())
    }
}
