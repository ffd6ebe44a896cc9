//! # arcstack-model
//!
//! Stateright model of the reference-counted stack protocol.
//!
//! The model tracks every node's reference count alongside the head slot
//! and checks that no node is reclaimed while a handle to it exists. A
//! variant with a split load-then-increment shows why the load must be
//! protected.

pub mod refstack;

pub use refstack::{
    counterexample_from_path, RcNode, ReclaimProtocol, RefStackAction, RefStackModel,
    RefStackState, ThreadState,
};
