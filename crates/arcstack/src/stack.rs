//! Lock-free LIFO stack over reference-counted nodes.
//!
//! # Invariants
//!
//! | Property | Verified By |
//! |----------|-------------|
//! | NoLostElements | DST, stress, loom |
//! | NoDuplicates | DST, stress, loom |
//! | LIFO_Order | DST, unit |
//! | Linearizability | stress histories, loom |
//! | NoUseAfterFree | stateright model, drop counting, held-node unit test |
//! | NodesReclaimed | counting allocator (`tests/reclamation.rs`) |
//!
//! # Memory Safety
//!
//! Nodes are shared through `Arc`. The head slot is an [`AtomicArc`], so a
//! thread that read the head always holds its own count on the node it is
//! looking at, and the node cannot be reclaimed under it. Published nodes
//! are never mutated; the only write after publication is the head slot.

use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::Arc;

use crossbeam_utils::{Backoff, CachePadded};

use crate::atomic_arc::{as_ptr, AtomicArc};
use crate::reclaim;

/// A node in the stack.
///
/// `value` is moved out exactly once, by the thread whose pop detaches the
/// node, or by the stack's `Drop` for nodes never popped. Dropping a node
/// never drops its value.
struct Node<T> {
    value: ManuallyDrop<T>,
    prev: Option<Arc<Node<T>>>,
}

// SAFETY: other threads only follow `prev` through a shared node. The value
// is moved out by one thread, or read in place only when `T: Sync`.
unsafe impl<T: Send> Sync for Node<T> {}

impl<T> Drop for Node<T> {
    fn drop(&mut self) {
        // Unlink iteratively so a long chain cannot overflow the call stack.
        let mut prev = self.prev.take();
        while let Some(node) = prev {
            prev = match Arc::into_inner(node) {
                Some(mut node) => node.prev.take(),
                None => None,
            };
        }
    }
}

/// A lock-free, multi-producer multi-consumer stack.
///
/// Operations are linearizable and lock-free: a failed CAS means another
/// thread's push or pop succeeded.
///
/// ```rust
/// use arcstack::ConcurrentStack;
///
/// let stack = ConcurrentStack::new();
/// stack.push(1);
/// stack.push(2);
/// assert_eq!(stack.pop(), Some(2));
/// assert_eq!(stack.pop(), Some(1));
/// assert_eq!(stack.pop(), None);
/// ```
pub struct ConcurrentStack<T> {
    head: CachePadded<AtomicArc<Node<T>>>,
}

impl<T: Send + 'static> ConcurrentStack<T> {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicArc::null()),
        }
    }

    /// Push a value onto the stack.
    pub fn push(&self, value: T) {
        let guard = reclaim::pin();
        let backoff = Backoff::new();

        let mut candidate = Arc::new(Node {
            value: ManuallyDrop::new(value),
            prev: self.head.load(&guard),
        });

        loop {
            let expected = as_ptr(candidate.prev.as_ref());
            match self.head.compare_exchange(expected, candidate, &guard) {
                Ok(()) => return,
                Err(err) => {
                    candidate = err.new;
                    Arc::get_mut(&mut candidate)
                        .expect("unpublished node is uniquely owned")
                        .prev = err.current;
                    back_off(&backoff);
                }
            }
        }
    }

    /// Pop the most recently pushed value.
    ///
    /// Returns `None` if the stack was empty at the instant of the load.
    pub fn pop(&self) -> Option<T> {
        let guard = reclaim::pin();
        let backoff = Backoff::new();

        let mut observed = self.head.load(&guard);
        loop {
            let node = observed?;
            match self.head.compare_exchange(Arc::as_ptr(&node), node.prev.clone(), &guard) {
                Ok(()) => {
                    // SAFETY: only the winning CAS detaches `node`, so no other
                    // thread moves this value out.
                    return Some(unsafe { take_value(&node) });
                }
                Err(err) => {
                    observed = err.current;
                    back_off(&backoff);
                }
            }
        }
    }

    /// Whether the stack was empty at the instant of the load.
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Copy the stack's contents, top first.
    ///
    /// The chain behind one head load is immutable, so this is exactly the
    /// content at that instant.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Copy + Sync,
    {
        let guard = reclaim::pin();
        let head = self.head.load(&guard);

        let mut contents = Vec::new();
        let mut cursor = head.as_deref();
        while let Some(node) = cursor {
            contents.push(*node.value);
            cursor = node.prev.as_deref();
        }
        contents
    }

    /// Strong counts on the head node besides the one taken by this call.
    #[cfg(test)]
    fn head_strong_count(&self, guard: &reclaim::Guard) -> Option<usize> {
        self.head.load(guard).map(|node| Arc::strong_count(&node) - 1)
    }
}

/// Move the value out of a detached node.
///
/// # Safety
///
/// The caller must be the only thread to ever take this node's value.
unsafe fn take_value<T>(node: &Node<T>) -> T {
    ManuallyDrop::into_inner(ptr::read(&node.value))
}

#[inline]
fn back_off(backoff: &Backoff) {
    #[cfg(loom)]
    {
        let _ = backoff;
        loom::thread::yield_now();
    }
    #[cfg(not(loom))]
    backoff.spin();
}

impl<T> Drop for ConcurrentStack<T> {
    fn drop(&mut self) {
        let mut next = self.head.take();
        while let Some(node) = next {
            // SAFETY: with `&mut self` nothing else can pop, and every node
            // still linked from the head holds its value.
            drop(unsafe { take_value(&node) });
            next = node.prev.clone();
        }
    }
}

impl<T: Send + 'static> Default for ConcurrentStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Extend<T> for ConcurrentStack<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}

impl<T: Send + 'static> FromIterator<T> for ConcurrentStack<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut stack = Self::new();
        stack.extend(iter);
        stack
    }
}

impl<T> fmt::Debug for ConcurrentStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentStack").finish_non_exhaustive()
    }
}
