//! Optional lookup results with a fluent presence hook.

/// A value that may or may not have been found in the cache.
///
/// Returned by the `peek_*` family. The intended use is a restoration
/// sequence after a view is recreated, where each cached key is checked
/// independently and re-attached only when it has settled:
///
/// ```ignore
/// cache
///     .peek_single::<String>("profile")?
///     .if_present(|replay| render(replay.subscribe()));
/// cache
///     .peek_completion("logout")?
///     .if_present(|replay| render_done(replay.subscribe()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct FromCache<T> {
    value: Option<T>,
}

impl<T> FromCache<T> {
    /// A present result.
    pub fn of(value: T) -> Self {
        Self { value: Some(value) }
    }

    /// An absent result.
    pub fn empty() -> Self {
        Self { value: None }
    }

    /// Run `action` with the value if present, then hand back `self` so
    /// further hooks can be chained.
    pub fn if_present(&self, action: impl FnOnce(&T)) -> &Self {
        if let Some(value) = &self.value {
            action(value);
        }
        self
    }

    #[must_use]
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    #[must_use]
    pub fn as_ref(&self) -> Option<&T> {
        self.value.as_ref()
    }

    #[must_use]
    pub fn into_option(self) -> Option<T> {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FromCache<U> {
        FromCache {
            value: self.value.map(f),
        }
    }
}

impl<T> Default for FromCache<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> From<Option<T>> for FromCache<T> {
    fn from(value: Option<T>) -> Self {
        Self { value }
    }
}

impl<T> From<FromCache<T>> for Option<T> {
    fn from(wrapper: FromCache<T>) -> Self {
        wrapper.value
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[test]
    fn action_runs_only_when_present() {
        let seen = RefCell::new(Vec::new());

        FromCache::of(7).if_present(|v| seen.borrow_mut().push(*v));
        FromCache::<i32>::empty().if_present(|v| seen.borrow_mut().push(*v));

        assert_eq!(*seen.borrow(), vec![7]);
    }

    #[test]
    fn hooks_chain_on_the_same_wrapper() {
        let calls = RefCell::new(0);
        let wrapper = FromCache::of("42");

        wrapper
            .if_present(|_| *calls.borrow_mut() += 1)
            .if_present(|_| *calls.borrow_mut() += 1);

        assert_eq!(*calls.borrow(), 2);
        assert_eq!(wrapper.as_ref(), Some(&"42"));
    }

    #[test]
    fn independent_wrappers_do_not_interact() {
        let restored = RefCell::new(Vec::new());
        let first = FromCache::of("stream");
        let second = FromCache::<&str>::empty();
        let third = FromCache::of("completion");

        first.if_present(|v| restored.borrow_mut().push(*v));
        second.if_present(|v| restored.borrow_mut().push(*v));
        third.if_present(|v| restored.borrow_mut().push(*v));

        assert_eq!(*restored.borrow(), vec!["stream", "completion"]);
    }

    #[test]
    fn conversions() {
        let wrapper: FromCache<u8> = Some(3).into();
        assert!(wrapper.is_present());
        assert_eq!(wrapper.clone().map(u32::from).into_option(), Some(3u32));

        let absent: Option<u8> = FromCache::default().into();
        assert_eq!(absent, None);
    }
}
