//! Debug-only reentrancy detection.
//!
//! Map operations run user code (`Hash`, `Eq`) while chain metadata may be
//! transiently inconsistent. Nested entry into the same map from that code
//! is a bug; in debug builds the flag turns it into a panic at the point of
//! reentry. Release builds compile the whole thing away.

use core::cell::Cell;
use core::marker::PhantomData;

/// Per-map reentry flag. Guard public entry points with
/// `let _g = self.reentrancy.enter();`.
pub(crate) struct ReentryFlag {
    #[cfg(debug_assertions)]
    active: Cell<bool>,
    // The marker keeps the flag !Send + !Sync, matching the map's
    // single-threaded contract.
    _not_send: PhantomData<*mut ()>,
}

impl ReentryFlag {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            active: Cell::new(false),
            _not_send: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn enter(&self) -> ReentryGuard<'_> {
        #[cfg(debug_assertions)]
        {
            assert!(
                !self.active.replace(true),
                "map re-entered from user code (Hash/Eq/Drop) during an operation"
            );
            ReentryGuard { flag: self }
        }

        #[cfg(not(debug_assertions))]
        {
            ReentryGuard {
                _flag: PhantomData,
            }
        }
    }
}

pub(crate) struct ReentryGuard<'a> {
    #[cfg(debug_assertions)]
    flag: &'a ReentryFlag,
    #[cfg(not(debug_assertions))]
    _flag: PhantomData<&'a ()>,
}

impl Drop for ReentryGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        self.flag.active.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::ReentryFlag;

    #[test]
    fn sequential_entries_are_fine() {
        let flag = ReentryFlag::new();
        drop(flag.enter());
        drop(flag.enter());
    }

    #[cfg(debug_assertions)]
    #[test]
    fn nested_entry_panics_in_debug() {
        let flag = ReentryFlag::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _outer = flag.enter();
            let _inner = flag.enter();
        }));
        assert!(result.is_err());
    }
}
