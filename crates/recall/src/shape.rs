//! Cardinality profiles of cached computations.

use std::fmt;

/// The cardinality and error profile of a cached computation.
///
/// Fixed per key for the key's whole lifetime in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Shape {
    /// Zero or more ordered items, then success or error.
    Stream,
    /// Exactly one item on success, or an error.
    Single,
    /// No items; success or error only.
    Completion,
}

impl Shape {
    /// Upper bound on buffered items for this shape.
    #[must_use]
    pub fn max_items(self) -> Option<usize> {
        match self {
            Self::Stream => None,
            Self::Single => Some(1),
            Self::Completion => Some(0),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Single => "single",
            Self::Completion => "completion",
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
