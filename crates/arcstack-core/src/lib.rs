//! # arcstack-core
//!
//! Invariants and verification vocabulary for the arcstack lock-free stack.
//!
//! This crate provides:
//! - `PropertyResult` and `PropertyChecker` for verifying invariants
//! - `Counterexample` for rendering failure paths as thread diagrams
//! - `StackHistory`, the interval-stamped record of push/pop calls
//! - `check_linearizable`, a bounded search for a legal sequential order
//!
//! Nothing here depends on the stack implementation itself. Implementations
//! expose their state through `StackProperties` and the checkers do the rest.

pub mod counterexample;
pub mod invariants;
pub mod property;

pub use counterexample::{Counterexample, MemoryIssue, StateSnapshot, ThreadAction};
pub use invariants::linearizability::{check_linearizable, HistoryError, HISTORY_OPERATIONS_MAX};
pub use invariants::stack::{
    StackHistory, StackOpType, StackOperation, StackProperties, StackPropertyChecker,
};
pub use property::{PropertyChecker, PropertyResult, PropertySummary};
