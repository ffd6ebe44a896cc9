//! A `ConcurrentStack<u64>` that records every call for the property checkers.
//!
//! Each call draws an invocation tick before touching the stack and a
//! response tick after, from one shared counter. The resulting intervals
//! are what `check_linearizable` searches over.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use arcstack_core::{StackHistory, StackProperties};

use crate::stack::ConcurrentStack;

/// Stack wrapper that stamps each push and pop with logical times.
///
/// The history lock is only taken after the stack operation returns, so it
/// never serializes the operations being observed.
#[derive(Debug, Default)]
pub struct TrackedStack {
    stack: ConcurrentStack<u64>,
    clock: AtomicU64,
    history: Mutex<StackHistory>,
}

impl TrackedStack {
    /// Create an empty tracked stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `value` on behalf of `thread_id`.
    pub fn push(&self, thread_id: u64, value: u64) {
        let invoked_at = self.tick();
        self.stack.push(value);
        let returned_at = self.tick();

        self.lock_history()
            .record_push(thread_id, value, invoked_at, returned_at);
    }

    /// Pop on behalf of `thread_id`.
    pub fn pop(&self, thread_id: u64) -> Option<u64> {
        let invoked_at = self.tick();
        let value = self.stack.pop();
        let returned_at = self.tick();

        self.lock_history()
            .record_pop(thread_id, value, invoked_at, returned_at);
        value
    }

    /// The underlying stack. Calls made through it are not recorded.
    pub fn inner(&self) -> &ConcurrentStack<u64> {
        &self.stack
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn lock_history(&self) -> MutexGuard<'_, StackHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StackProperties for TrackedStack {
    fn current_contents(&self) -> Vec<u64> {
        self.stack.snapshot()
    }

    fn history(&self) -> StackHistory {
        self.lock_history().clone()
    }
}
