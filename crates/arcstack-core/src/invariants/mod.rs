//! Invariant traits and checkers for the concurrent stack.

pub mod linearizability;
pub mod stack;

pub use linearizability::{check_linearizable, HistoryError};
pub use stack::{StackHistory, StackOperation, StackProperties, StackPropertyChecker};
