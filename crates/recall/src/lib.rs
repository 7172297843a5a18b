//! # nebula-recall
//!
//! Single-flight, replaying cache for asynchronous computations.
//!
//! A computation is cached under a caller-chosen key together with its
//! [`Shape`]: a stream of items, a single value, or a bare completion. The
//! first [`attach`](ObservableCache::attach_stream) for a key starts its
//! producer; every later attach joins it mid-flight (buffered items first,
//! then live ones) or, once it settled, replays the frozen outcome. Errors
//! are cached like values.
//!
//! ## Quick Start
//!
//! ```rust
//! use futures::StreamExt;
//! use nebula_recall::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = ObservableCache::new()?;
//!
//! let pages = || futures::stream::iter([Ok::<_, std::io::Error>(1), Ok(2)]);
//! let first: Vec<u32> = cache.attach_stream("pages", pages)?.map(Result::unwrap).collect().await;
//!
//! // Settled: the factory is not invoked again.
//! let again: Vec<u32> = cache.attach_stream("pages", pages)?.map(Result::unwrap).collect().await;
//! assert_eq!(first, again);
//!
//! // Peeking never starts work.
//! assert!(cache.peek_stream::<u32>("unknown")?.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `serde` (default): deserialize [`CacheConfig`] from configuration files
//!
//! ## Architecture
//!
//! - `store`: key → entry map, heterogeneous over item types
//! - `broadcaster`: per-key single-flight execution and fan-out
//! - [`observer`]: the handles attaches and peeks hand out
//! - [`ObservableCache`]: the attach / peek / evict API composing the above
//! - Standalone error handling via the [`error`] module
//! - Structured logging via `tracing`; the crate never installs a subscriber

#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
// Hit rates are reported as f64 percentages
#![allow(clippy::cast_precision_loss)]

mod broadcaster;
pub mod cache;
pub mod config;
mod entry;
pub mod error;
pub mod executor;
pub mod from_cache;
pub mod key;
pub mod observer;
pub mod shape;
pub mod stats;
mod store;

pub use cache::{ObservableCache, ObservableCacheBuilder};
pub use config::{CacheConfig, EvictionMode};
pub use error::{BoxError, CacheError, CacheResult, SharedError};
pub use executor::{Executor, TokioExecutor};
pub use from_cache::FromCache;
pub use key::CacheKey;
pub use observer::{
    CachedCompletion, CachedSingle, CachedStream, ReplayCompletion, ReplaySingle, ReplayStream,
};
pub use shape::Shape;
pub use stats::{AtomicCacheStats, CacheStats};

/// Common imports
pub mod prelude {
    pub use crate::{
        CacheConfig, CacheError, CacheKey, CacheResult, CachedCompletion, CachedSingle,
        CachedStream, EvictionMode, FromCache, ObservableCache, ReplayCompletion, ReplaySingle,
        ReplayStream, SharedError, Shape,
    };
}
