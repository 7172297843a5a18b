//! Cache keys.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Caller-assigned identifier of one logical computation.
///
/// Keys are opaque: no namespace, no expiry. Cloning shares the underlying
/// string, so keys can be threaded through producer tasks and log fields
/// freely.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Create a key from anything string-like.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(Arc::from(key))
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl From<&String> for CacheKey {
    fn from(key: &String) -> Self {
        Self::new(key)
    }
}

impl From<&CacheKey> for CacheKey {
    fn from(key: &CacheKey) -> Self {
        key.clone()
    }
}
