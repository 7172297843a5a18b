//! Standalone error types for nebula-recall
//!
//! Two families live here: [`CacheError`], raised by the cache itself
//! (programming errors at the call site, or terminal failures it injects
//! into observer streams), and [`SharedError`], the reference-counted form
//! every producer error is converted into so all observers of a key see the
//! very same value.

use std::sync::Arc;

use thiserror::Error;

use crate::key::CacheKey;
use crate::shape::Shape;

/// Boxed error accepted from producers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Producer error as delivered to observers.
///
/// Cloning is a reference-count bump; every observer of a failed key holds a
/// pointer to the same allocation (`Arc::ptr_eq` holds across observers and
/// replays).
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised by the cache.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The key is already cached under a different shape.
    #[error("shape mismatch for key '{key}': cached as {stored}, requested as {requested}")]
    ShapeMismatch {
        key: CacheKey,
        stored: Shape,
        requested: Shape,
    },

    /// The key is already cached with a different item type.
    #[error("type mismatch for key '{key}': cached items are `{stored}`, requested `{requested}`")]
    TypeMismatch {
        key: CacheKey,
        stored: &'static str,
        requested: &'static str,
    },

    /// The entry was evicted while its producer was still running.
    #[error("entry '{key}' was evicted before it settled")]
    Evicted { key: CacheKey },

    /// An observer channel closed without the value its shape promises.
    #[error("'{key}' closed without a value")]
    Incomplete { key: CacheKey },

    /// The producer panicked before reaching a terminal signal.
    #[error("producer for '{key}' panicked")]
    ProducerPanicked { key: CacheKey },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// No executor was supplied and no tokio runtime is running.
    #[error("no executor configured and no tokio runtime is running")]
    NoRuntime,
}

impl CacheError {
    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ShapeMismatch { .. } => "RECALL:KEY:SHAPE",
            Self::TypeMismatch { .. } => "RECALL:KEY:TYPE",
            Self::Evicted { .. } => "RECALL:ENTRY:EVICTED",
            Self::Incomplete { .. } => "RECALL:ENTRY:INCOMPLETE",
            Self::ProducerPanicked { .. } => "RECALL:PRODUCER:PANIC",
            Self::InvalidConfig { .. } => "RECALL:CONFIG:INVALID",
            Self::NoRuntime => "RECALL:RUNTIME:MISSING",
        }
    }

    /// Whether this is a misuse of the API rather than a runtime outcome.
    ///
    /// Mismatches are never coerced: they indicate two call sites disagree
    /// about what a key holds.
    #[must_use]
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::ShapeMismatch { .. } | Self::TypeMismatch { .. } | Self::InvalidConfig { .. }
        )
    }

    /// Create invalid config error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Wrap this error for delivery through an observer stream.
    #[must_use]
    pub fn into_shared(self) -> SharedError {
        Arc::new(self)
    }
}

/// Convert a producer error into its shared form.
pub(crate) fn share(error: impl Into<BoxError>) -> SharedError {
    Arc::from(error.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let errors = [
            CacheError::ShapeMismatch {
                key: "k".into(),
                stored: Shape::Single,
                requested: Shape::Stream,
            },
            CacheError::TypeMismatch {
                key: "k".into(),
                stored: "u32",
                requested: "String",
            },
            CacheError::Evicted { key: "k".into() },
            CacheError::Incomplete { key: "k".into() },
            CacheError::ProducerPanicked { key: "k".into() },
            CacheError::invalid_config("zero"),
            CacheError::NoRuntime,
        ];

        let mut codes: Vec<_> = errors.iter().map(CacheError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn mismatches_are_programming_errors() {
        let shape = CacheError::ShapeMismatch {
            key: "k".into(),
            stored: Shape::Completion,
            requested: Shape::Single,
        };
        assert!(shape.is_programming_error());
        assert!(!CacheError::Evicted { key: "k".into() }.is_programming_error());
    }

    #[test]
    fn display_names_both_shapes() {
        let err = CacheError::ShapeMismatch {
            key: "profile".into(),
            stored: Shape::Single,
            requested: Shape::Stream,
        };
        assert_eq!(
            err.to_string(),
            "shape mismatch for key 'profile': cached as single, requested as stream"
        );
    }

    #[test]
    fn share_keeps_message() {
        let shared = share("boom");
        assert_eq!(shared.to_string(), "boom");

        let again = Arc::clone(&shared);
        assert!(Arc::ptr_eq(&shared, &again));
    }
}
