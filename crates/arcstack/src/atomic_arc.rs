//! An atomic, nullable slot holding one strong count of an `Arc`.
//!
//! The slot stores the raw pointer from `Arc::into_raw`. Readers load the
//! pointer and take their own strong count while pinned; writers swap the
//! pointer and hand the count the slot owned for the old value to the
//! `RetireList`, which releases it only once no pinned reader can still be
//! between its load and its increment.

use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;

#[cfg(loom)]
use loom::sync::atomic::{AtomicPtr, Ordering};
#[cfg(not(loom))]
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::reclaim::{Guard, RetireList};

mod sealed {
    pub trait Sealed {}

    impl<T> Sealed for std::sync::Arc<T> {}
    impl<T> Sealed for Option<std::sync::Arc<T>> {}
}

/// An owned strong count that can be stored in an [`AtomicArc`].
///
/// Implemented for `Arc<T>` and `Option<Arc<T>>`, where `None` is the null
/// pointer.
pub trait Handle<T>: sealed::Sealed {
    /// Give up the count as a raw pointer.
    fn into_raw(self) -> *const T;

    /// Take back a count given up by [`Handle::into_raw`].
    ///
    /// # Safety
    ///
    /// `raw` must come from `into_raw` on the same handle type, and the
    /// count it carries must not have been reclaimed already.
    unsafe fn from_raw(raw: *const T) -> Self;
}

impl<T> Handle<T> for Arc<T> {
    fn into_raw(self) -> *const T {
        Arc::into_raw(self)
    }

    unsafe fn from_raw(raw: *const T) -> Self {
        debug_assert!(!raw.is_null(), "Arc handle must not be null");
        Arc::from_raw(raw)
    }
}

impl<T> Handle<T> for Option<Arc<T>> {
    fn into_raw(self) -> *const T {
        self.map_or(ptr::null(), Arc::into_raw)
    }

    unsafe fn from_raw(raw: *const T) -> Self {
        if raw.is_null() {
            None
        } else {
            Some(Arc::from_raw(raw))
        }
    }
}

/// Pointer identity of an optional handle, for use as the expected value
/// of [`AtomicArc::compare_exchange`].
#[must_use]
pub fn as_ptr<T>(handle: Option<&Arc<T>>) -> *const T {
    handle.map_or(ptr::null(), Arc::as_ptr)
}

/// The slot held something other than the expected pointer.
pub struct CompareExchangeError<T, N> {
    /// A counted handle on what the slot held at the time of the attempt.
    pub current: Option<Arc<T>>,
    /// The handle that was not stored, returned to the caller.
    pub new: N,
}

impl<T, N> fmt::Debug for CompareExchangeError<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompareExchangeError")
            .field("current", &as_ptr(self.current.as_ref()))
            .finish_non_exhaustive()
    }
}

/// Atomic `Option<Arc<T>>`.
///
/// Every operation takes a [`Guard`] from [`crate::pin`]. A handle returned
/// by `load` stays valid after the guard is dropped; it is an ordinary
/// `Arc`.
pub struct AtomicArc<T> {
    ptr: AtomicPtr<T>,
    retired: RetireList<T>,
    _owns: PhantomData<Arc<T>>,
}

impl<T: Send + Sync + 'static> AtomicArc<T> {
    /// Create a slot holding `value`.
    pub fn new(value: Option<Arc<T>>) -> Self {
        Self {
            ptr: AtomicPtr::new(value.into_raw().cast_mut()),
            retired: RetireList::new(),
            _owns: PhantomData,
        }
    }

    /// Create an empty slot.
    pub fn null() -> Self {
        Self::new(None)
    }

    /// Load the current value and take a strong count on it.
    pub fn load(&self, _guard: &Guard) -> Option<Arc<T>> {
        let raw = self.ptr.load(Ordering::Acquire);
        // SAFETY: `raw` was stored by this slot and the caller is pinned, so
        // the slot's count on it has not been released yet.
        unsafe { acquire(raw) }
    }

    /// Store `new` if the slot still holds `current`.
    ///
    /// On success the slot's count on the old value is retired. On failure
    /// the error carries a counted handle on the value actually found and
    /// gives `new` back unchanged.
    pub fn compare_exchange<N>(
        &self,
        current: *const T,
        new: N,
        guard: &Guard,
    ) -> Result<(), CompareExchangeError<T, N>>
    where
        N: Handle<T>,
    {
        let new_raw = new.into_raw();

        match self.ptr.compare_exchange(
            current.cast_mut(),
            new_raw.cast_mut(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(old) => {
                // SAFETY: `old` was the slot's own count, now given up.
                if let Some(old) = unsafe { <Option<Arc<T>>>::from_raw(old) } {
                    self.retired.retire(old, guard);
                }
                Ok(())
            }
            Err(actual) => Err(CompareExchangeError {
                // SAFETY: `actual` was in the slot while the caller is pinned.
                current: unsafe { acquire(actual) },
                // SAFETY: `new_raw` came from `new` and was not stored.
                new: unsafe { N::from_raw(new_raw) },
            }),
        }
    }
}

impl<T> AtomicArc<T> {
    /// Whether the slot was empty at the instant of the load.
    pub fn is_null(&self) -> bool {
        self.ptr.load(Ordering::Acquire).is_null()
    }

    /// Empty the slot through exclusive access, returning its own count.
    pub fn take(&mut self) -> Option<Arc<T>> {
        #[cfg(not(loom))]
        let raw = std::mem::replace(self.ptr.get_mut(), ptr::null_mut());
        #[cfg(loom)]
        let raw = self.ptr.with_mut(|p| std::mem::replace(p, ptr::null_mut()));
        // SAFETY: no other thread can observe the slot; its count moves out.
        unsafe { <Option<Arc<T>>>::from_raw(raw) }
    }
}

/// Take a new strong count on `raw`.
///
/// # Safety
///
/// `raw` must be null or point to a live `Arc` allocation whose count
/// cannot drop to zero before this returns.
unsafe fn acquire<T>(raw: *const T) -> Option<Arc<T>> {
    if raw.is_null() {
        return None;
    }
    Arc::increment_strong_count(raw);
    Some(Arc::from_raw(raw))
}

impl<T: Send + Sync + 'static> Default for AtomicArc<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Drop for AtomicArc<T> {
    fn drop(&mut self) {
        drop(self.take());
    }
}

impl<T> fmt::Debug for AtomicArc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicArc")
            .field("ptr", &self.ptr.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::reclaim::pin;

    #[test]
    fn test_null_slot() {
        let slot: AtomicArc<u64> = AtomicArc::null();
        let guard = pin();

        assert!(slot.is_null());
        assert!(slot.load(&guard).is_none());
    }

    #[test]
    fn test_load_takes_a_count() {
        let value = Arc::new(5u64);
        let slot = AtomicArc::new(Some(value.clone()));
        assert_eq!(Arc::strong_count(&value), 2);

        let loaded = slot.load(&pin()).unwrap();
        assert_eq!(*loaded, 5);
        assert!(Arc::ptr_eq(&loaded, &value));
        assert_eq!(Arc::strong_count(&value), 3);

        drop(loaded);
        assert_eq!(Arc::strong_count(&value), 2);
    }

    #[test]
    fn test_drop_releases_slot_count() {
        let value = Arc::new(String::from("held"));
        let slot = AtomicArc::new(Some(value.clone()));
        assert_eq!(Arc::strong_count(&value), 2);

        drop(slot);
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn test_compare_exchange_success() {
        let first = Arc::new(1u64);
        let slot = AtomicArc::new(Some(first.clone()));
        let guard = pin();

        let second = Arc::new(2u64);
        slot.compare_exchange(Arc::as_ptr(&first), second.clone(), &guard)
            .unwrap();

        let loaded = slot.load(&guard).unwrap();
        assert!(Arc::ptr_eq(&loaded, &second));
        // The retired count may still be pending; our own handle is intact.
        assert_eq!(*first, 1);
    }

    #[test]
    fn test_compare_exchange_failure_reports_current() {
        let actual = Arc::new(10u64);
        let slot = AtomicArc::new(Some(actual.clone()));
        let guard = pin();

        let stale = Arc::new(99u64);
        let candidate = Arc::new(11u64);
        let err = slot
            .compare_exchange(Arc::as_ptr(&stale), candidate.clone(), &guard)
            .unwrap_err();

        assert!(Arc::ptr_eq(err.current.as_ref().unwrap(), &actual));
        assert!(Arc::ptr_eq(&err.new, &candidate));
        assert!(format!("{:?}", err).starts_with("CompareExchangeError"));

        // Nothing changed in the slot.
        assert!(Arc::ptr_eq(&slot.load(&guard).unwrap(), &actual));
    }

    #[test]
    fn test_compare_exchange_to_null() {
        let value = Arc::new(3u64);
        let slot = AtomicArc::new(Some(value.clone()));
        let guard = pin();

        slot.compare_exchange(as_ptr(Some(&value)), None, &guard)
            .unwrap();
        assert!(slot.is_null());

        let err = slot
            .compare_exchange(Arc::as_ptr(&value), Some(value.clone()), &guard)
            .unwrap_err();
        assert!(err.current.is_none());
        assert!(err.new.is_some());
    }

    #[test]
    fn test_take_moves_slot_count_out() {
        let value = Arc::new(8u64);
        let mut slot = AtomicArc::new(Some(value.clone()));

        let taken = slot.take().unwrap();
        assert!(slot.is_null());
        assert_eq!(Arc::strong_count(&value), 2);

        drop(taken);
        drop(slot);
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn test_concurrent_loads_and_exchanges() {
        let slot = AtomicArc::new(Some(Arc::new(0u64)));

        std::thread::scope(|s| {
            for t in 0..4u64 {
                let slot = &slot;
                s.spawn(move || {
                    for i in 0..1_000u64 {
                        let guard = pin();
                        let current = slot.load(&guard);
                        if let Some(v) = &current {
                            assert!(**v < 4_000);
                        }
                        if i % 2 == 0 {
                            let _ = slot.compare_exchange(
                                as_ptr(current.as_ref()),
                                Arc::new(t * 1_000 + i),
                                &guard,
                            );
                        }
                    }
                });
            }
        });

        assert!(!slot.is_null());
    }
}
