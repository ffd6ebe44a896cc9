//! Deferred release of references dropped by the head slot.
//!
//! A reference the slot owned for a pointer it no longer holds cannot be
//! released on the spot: another thread may have loaded that pointer and
//! not yet taken its own count. With `crossbeam-epoch` the release is
//! deferred until every thread pinned at the time has unpinned.
//!
//! Under `cfg(loom)` the epoch collector is replaced by a retire list that
//! is emptied when the slot itself is dropped. Loom runs are bounded, so
//! holding every retired reference until then is fine.

use std::sync::Arc;

#[cfg(not(loom))]
pub use crossbeam_epoch::{pin, Guard};

#[cfg(loom)]
pub use self::loom_epoch::{pin, Guard};

#[cfg(loom)]
mod loom_epoch {
    /// Stand-in for an epoch guard; retirement goes through `RetireList`.
    #[derive(Debug)]
    pub struct Guard {
        _private: (),
    }

    /// Pin the current thread.
    pub fn pin() -> Guard {
        Guard { _private: () }
    }
}

/// References retired by one slot.
#[cfg(not(loom))]
pub(crate) struct RetireList<T> {
    _marker: std::marker::PhantomData<Arc<T>>,
}

#[cfg(not(loom))]
impl<T: Send + Sync + 'static> RetireList<T> {
    pub(crate) fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }

    /// Release `reference` once no thread pinned now can still be reading
    /// the pointer it came from.
    pub(crate) fn retire(&self, reference: Arc<T>, guard: &Guard) {
        guard.defer(move || drop(reference));
    }
}

/// References retired by one slot.
#[cfg(loom)]
pub(crate) struct RetireList<T> {
    retired: loom::sync::Mutex<Vec<Arc<T>>>,
}

#[cfg(loom)]
impl<T: Send + Sync + 'static> RetireList<T> {
    pub(crate) fn new() -> Self {
        Self {
            retired: loom::sync::Mutex::new(Vec::new()),
        }
    }

    /// Hold `reference` until the slot is dropped.
    pub(crate) fn retire(&self, reference: Arc<T>, _guard: &Guard) {
        self.retired
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(reference);
    }
}
