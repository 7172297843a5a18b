//! Cache statistics
//!
//! Lock-free counters updated on every attach, peek and eviction. Reading
//! them takes a [`CacheStats`] snapshot; counters are independent, so a
//! snapshot taken under load is not a consistent cut across fields.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for cache operations.
#[derive(Debug, Default)]
pub struct AtomicCacheStats {
    /// Producer factories invoked
    executions: AtomicU64,
    /// Attaches that joined a pending entry
    joins: AtomicU64,
    /// Attaches served entirely from a settled entry
    replays: AtomicU64,
    peek_hits: AtomicU64,
    peek_misses: AtomicU64,
    evictions: AtomicU64,
    /// Evictions that stopped a running producer
    cancellations: AtomicU64,
}

impl AtomicCacheStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_execution(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_join(&self) {
        self.joins.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_peek(&self, hit: bool) {
        if hit {
            self.peek_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.peek_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_eviction(&self, cancelled: bool) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        if cancelled {
            self.cancellations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take a point-in-time snapshot
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            executions: self.executions.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            peek_hits: self.peek_hits.load(Ordering::Relaxed),
            peek_misses: self.peek_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        for counter in [
            &self.executions,
            &self.joins,
            &self.replays,
            &self.peek_hits,
            &self.peek_misses,
            &self.evictions,
            &self.cancellations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of [`AtomicCacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub executions: u64,
    pub joins: u64,
    pub replays: u64,
    pub peek_hits: u64,
    pub peek_misses: u64,
    pub evictions: u64,
    pub cancellations: u64,
}

impl CacheStats {
    /// Total attaches, whichever path served them
    #[must_use]
    pub fn attaches(&self) -> u64 {
        self.executions + self.joins + self.replays
    }

    /// Share of attaches that did not start a producer, in percent
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.attaches();
        if total == 0 {
            0.0
        } else {
            (self.joins + self.replays) as f64 / total as f64 * 100.0
        }
    }
}
