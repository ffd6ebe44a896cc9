//! # arcstack
//!
//! A lock-free, multi-producer multi-consumer stack whose nodes are shared
//! through `Arc`.
//!
//! The head of the stack is an [`AtomicArc`]: a single atomic pointer that
//! owns one strong count of the node it points at. Every read of the head
//! takes its own count under an epoch guard, so a node stays alive for as
//! long as any thread is looking at it, and the count the head gave up is
//! only released once no reader can still be racing for it.
//!
//! Verification:
//! - `cargo test` runs unit, stress and DST tests
//! - `RUSTFLAGS="--cfg loom" cargo test -p arcstack --release` explores
//!   interleavings of the stack and the head slot with loom
//! - `arcstack-model` model-checks the refcounting protocol with stateright
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//!
//! use arcstack::ConcurrentStack;
//!
//! let stack = Arc::new(ConcurrentStack::new());
//! let handles: Vec<_> = (0..4u64)
//!     .map(|t| {
//!         let stack = Arc::clone(&stack);
//!         thread::spawn(move || stack.push(t))
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! let mut popped: Vec<u64> = std::iter::from_fn(|| stack.pop()).collect();
//! popped.sort_unstable();
//! assert_eq!(popped, vec![0, 1, 2, 3]);
//! ```

pub mod atomic_arc;
pub mod reclaim;
pub mod stack;
#[cfg(not(loom))]
pub mod tracked;

pub use atomic_arc::{as_ptr, AtomicArc, CompareExchangeError, Handle};
pub use reclaim::{pin, Guard};
pub use stack::ConcurrentStack;
#[cfg(not(loom))]
pub use tracked::TrackedStack;
