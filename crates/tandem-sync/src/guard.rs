//! Per-key reentrancy guard.
//!
//! Applying a local edit to a text container makes the document report that
//! same edit back. Running both the edit and the handling of its report under
//! one key makes the report arrive while the key is busy, so it is dropped
//! instead of being applied a second time.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use smol_str::SmolStr;

/// Failure of an action run through [`ExclusiveGuard::run`].
#[derive(Debug, thiserror::Error)]
#[error("guarded action for `{key}` failed")]
pub struct GuardError<E> {
    pub key: SmolStr,
    #[source]
    pub source: E,
}

/// Set of keys with an action in progress.
#[derive(Debug, Default)]
pub struct ExclusiveGuard {
    busy: RefCell<HashSet<SmolStr>>,
}

/// Busy mark for one key, cleared on drop.
#[derive(Debug)]
pub struct BusyMark<'a> {
    guard: &'a ExclusiveGuard,
    key: SmolStr,
}

impl Drop for BusyMark<'_> {
    fn drop(&mut self) {
        self.guard.busy.borrow_mut().remove(&self.key);
    }
}

/// Busy mark that keeps its guard alive. Held across awaits and host round
/// trips; cleared on drop.
#[derive(Debug)]
pub struct OwnedBusyMark {
    guard: Rc<ExclusiveGuard>,
    key: SmolStr,
}

impl OwnedBusyMark {
    pub fn key(&self) -> &SmolStr {
        &self.key
    }
}

impl Drop for OwnedBusyMark {
    fn drop(&mut self) {
        self.guard.busy.borrow_mut().remove(&self.key);
    }
}

impl ExclusiveGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark(&self, key: &SmolStr) -> bool {
        self.busy.borrow_mut().insert(key.clone())
    }

    /// Whether an action for `key` is in progress.
    pub fn is_busy(&self, key: &str) -> bool {
        self.busy.borrow().contains(key)
    }

    /// Mark `key` busy, or return `None` if it already is.
    pub fn try_enter(&self, key: &str) -> Option<BusyMark<'_>> {
        let key = SmolStr::new(key);
        if !self.mark(&key) {
            return None;
        }
        Some(BusyMark { guard: self, key })
    }

    /// Like [`try_enter`](Self::try_enter), for a mark that outlives the borrow.
    pub fn try_enter_owned(guard: &Rc<Self>, key: &str) -> Option<OwnedBusyMark> {
        let key = SmolStr::new(key);
        if !guard.mark(&key) {
            return None;
        }
        Some(OwnedBusyMark {
            guard: Rc::clone(guard),
            key,
        })
    }

    /// Run `action` unless an action for `key` is already in progress.
    ///
    /// Returns `Ok(None)` when the call was dropped. Re-entrant calls are not
    /// queued. The busy mark is cleared before a failure is handed back.
    pub fn run<T, E>(
        &self,
        key: &str,
        action: impl FnOnce() -> Result<T, E>,
    ) -> Result<Option<T>, GuardError<E>> {
        let Some(mark) = self.try_enter(key) else {
            tracing::debug!(key, "dropping re-entrant action");
            return Ok(None);
        };
        let result = action();
        drop(mark);
        result.map(Some).map_err(|source| GuardError {
            key: key.into(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::convert::Infallible;

    use super::*;

    #[test]
    fn test_nested_same_key_is_dropped() {
        let guard = ExclusiveGuard::new();
        let calls = Cell::new(0);

        let outer = guard.run("a.rs", || {
            calls.set(calls.get() + 1);
            let inner = guard.run("a.rs", || {
                calls.set(calls.get() + 1);
                Ok::<_, Infallible>(())
            });
            assert!(matches!(inner, Ok(None)));
            Ok::<_, Infallible>("done")
        });

        assert!(matches!(outer, Ok(Some("done"))));
        assert_eq!(calls.get(), 1);
        assert!(!guard.is_busy("a.rs"));
    }

    #[test]
    fn test_nested_other_key_runs() {
        let guard = ExclusiveGuard::new();
        let calls = Cell::new(0);

        let _ = guard.run("a.rs", || {
            guard.run("b.rs", || {
                calls.set(calls.get() + 1);
                Ok::<_, Infallible>(())
            })
        });

        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_failure_clears_mark_and_propagates() {
        let guard = ExclusiveGuard::new();

        let result: Result<Option<()>, _> = guard.run("a.rs", || {
            assert!(guard.is_busy("a.rs"));
            Err("boom")
        });

        let err = result.unwrap_err();
        assert_eq!(err.key, "a.rs");
        assert_eq!(err.source, "boom");
        assert!(!guard.is_busy("a.rs"));
        assert!(guard.try_enter("a.rs").is_some());
    }

    #[test]
    fn test_owned_mark_blocks_until_dropped() {
        let guard = Rc::new(ExclusiveGuard::new());
        let held = ExclusiveGuard::try_enter_owned(&guard, "a.rs").unwrap();
        assert_eq!(held.key(), "a.rs");

        let dropped = guard.run("a.rs", || Ok::<_, Infallible>(()));
        assert!(matches!(dropped, Ok(None)));
        assert!(ExclusiveGuard::try_enter_owned(&guard, "a.rs").is_none());
        assert!(guard.try_enter("b.rs").is_some());

        drop(held);
        assert!(!guard.is_busy("a.rs"));
    }

    #[test]
    fn test_mark_released_on_drop() {
        let guard = ExclusiveGuard::new();
        let mark = guard.try_enter("k");
        assert!(mark.is_some());
        assert!(guard.try_enter("k").is_none());
        drop(mark);
        assert!(guard.try_enter("k").is_some());
    }
}
