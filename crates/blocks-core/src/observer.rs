#![forbid(unsafe_code)]

//! Dependency tracking.
//!
//! A stack of observation frames lives in thread-local storage. Starting an
//! observation pushes an empty frame; every observable read while frames are
//! active registers with the innermost frame only; stopping pops the frame
//! and yields the observables it collected, in first-read order.
//!
//! # Invariants
//!
//! 1. An observable appears at most once per frame.
//! 2. Reads made inside a nested frame are not visible to the outer frame.
//! 3. Reads made with no active frame are dropped.
//!
//! # Failure Modes
//!
//! A frame that is started but never stopped would capture reads meant for
//! its parent. [`ObserveGuard`] pops its frame on drop, so an early return
//! or a `?` cannot leave one behind.

use std::cell::RefCell;

use ahash::AHashSet;

use crate::observable::Observable;

#[derive(Default)]
struct Frame {
    order: Vec<Observable>,
    seen: AHashSet<u64>,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn start_observing() {
    FRAMES.with(|frames| frames.borrow_mut().push(Frame::default()));
}

pub(crate) fn stop_observing() -> Vec<Observable> {
    FRAMES.with(|frames| frames.borrow_mut().pop().map(|f| f.order).unwrap_or_default())
}

/// Record a read of `observable` in the innermost frame.
pub(crate) fn register(observable: &Observable) {
    FRAMES.with(|frames| {
        if let Some(frame) = frames.borrow_mut().last_mut()
            && frame.seen.insert(observable.id())
        {
            frame.order.push(observable.clone());
        }
    });
}

/// Number of observables collected so far by the innermost frame.
pub(crate) fn current_len() -> usize {
    FRAMES.with(|frames| frames.borrow().last().map_or(0, |f| f.order.len()))
}

/// Number of active frames.
#[must_use]
pub fn depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

/// RAII handle for one observation frame.
#[must_use = "dropping the guard ends the observation immediately"]
pub(crate) struct ObserveGuard {
    active: bool,
}

impl ObserveGuard {
    pub(crate) fn start() -> Self {
        start_observing();
        Self { active: true }
    }

    /// End the observation and return what it collected.
    pub(crate) fn finish(mut self) -> Vec<Observable> {
        self.active = false;
        stop_observing()
    }
}

impl Drop for ObserveGuard {
    fn drop(&mut self) {
        if self.active {
            stop_observing();
        }
    }
}

/// Run `f` inside a fresh frame and return its result with the observables
/// it read.
pub fn observe<R>(f: impl FnOnce() -> R) -> (R, Vec<Observable>) {
    let guard = ObserveGuard::start();
    let result = f();
    (result, guard.finish())
}

/// Run `f` so that none of its reads reach an enclosing frame.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    observe(f).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn repeated_reads_record_once(reads in 1usize..40, others in 0usize..4) {
            let a = Observable::new(1);
            let rest: Vec<Observable> = (0..others).map(|i| Observable::new(i)).collect();
            let ((), seen) = observe(|| {
                for i in 0..reads {
                    let _ = a.get();
                    if let Some(other) = rest.get(i % rest.len().max(1)) {
                        let _ = other.get();
                    }
                }
            });
            let expected = 1 + others.min(reads);
            prop_assert_eq!(seen.len(), expected);
            prop_assert_eq!(seen[0].id(), a.id());
        }
    }

    #[test]
    fn collects_each_observable_once_in_read_order() {
        let a = Observable::new(1);
        let b = Observable::new(2);
        let ((), seen) = observe(|| {
            let _ = a.get();
            let _ = b.get();
            let _ = a.get();
        });
        let ids: Vec<u64> = seen.iter().map(Observable::id).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }

    #[test]
    fn nested_frames_are_isolated() {
        let outer = Observable::new(1);
        let inner = Observable::new(2);
        let ((), outer_seen) = observe(|| {
            let _ = outer.get();
            let ((), inner_seen) = observe(|| {
                let _ = inner.get();
            });
            assert_eq!(inner_seen.len(), 1);
        });
        assert_eq!(outer_seen.len(), 1);
        assert_eq!(outer_seen[0].id(), outer.id());
    }

    #[test]
    fn reads_without_a_frame_are_dropped() {
        let a = Observable::new(1);
        let _ = a.get();
        assert_eq!(depth(), 0);
    }

    #[test]
    fn guard_pops_on_drop() {
        {
            let _guard = ObserveGuard::start();
            assert_eq!(depth(), 1);
        }
        assert_eq!(depth(), 0);
    }

    #[test]
    fn peek_does_not_register() {
        let a = Observable::new(1);
        let ((), seen) = observe(|| {
            let _ = a.peek();
        });
        assert!(seen.is_empty());
    }
}
