//! Linearizability checking for stack histories.
//!
//! A history is linearizable when its operations can be arranged in one
//! total order that (a) never places an operation before another that
//! returned before it was invoked, and (b) replays on a sequential stack
//! with exactly the recorded pop results.
//!
//! Sequential histories are replayed directly. Overlapping histories are
//! searched depth-first, memoizing on (completed set, stack contents).

use std::collections::HashSet;

use thiserror::Error;

use crate::invariants::stack::{StackHistory, StackOpType, StackOperation};

/// Upper bound on operations in an overlapping history.
///
/// The completed set is tracked as a `u64` bitmask.
pub const HISTORY_OPERATIONS_MAX: usize = 64;

/// Reasons a history cannot be checked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// The overlapping history is larger than the search supports.
    #[error("history has {operations} overlapping operations; the search is bounded at {max}")]
    TooLarge { operations: usize, max: usize },

    /// An operation claims to have returned before it was invoked.
    #[error("operation {index} returned at {returned_at} before it was invoked at {invoked_at}")]
    InvertedInterval {
        index: usize,
        invoked_at: u64,
        returned_at: u64,
    },

    /// A push or successful pop without an element.
    #[error("operation {index} ({op_type:?}) carries no element")]
    MissingElement { index: usize, op_type: StackOpType },
}

/// Search for a linearization of `history`.
///
/// Returns `Ok(Some(order))` with indices into `history.operations` in
/// linearization order, `Ok(None)` when no legal order exists, and `Err`
/// when the history is malformed or too large to search.
pub fn check_linearizable(history: &StackHistory) -> Result<Option<Vec<usize>>, HistoryError> {
    validate(&history.operations)?;

    if history.is_sequential() {
        return Ok(replay_sequential(&history.operations));
    }

    let operations = history.operations.len();
    if operations > HISTORY_OPERATIONS_MAX {
        return Err(HistoryError::TooLarge {
            operations,
            max: HISTORY_OPERATIONS_MAX,
        });
    }

    let mut search = Search {
        ops: &history.operations,
        stack: Vec::new(),
        order: Vec::with_capacity(operations),
        visited: HashSet::new(),
    };
    let all_done = if operations == HISTORY_OPERATIONS_MAX {
        u64::MAX
    } else {
        (1u64 << operations) - 1
    };

    if search.explore(0, all_done) {
        Ok(Some(search.order))
    } else {
        Ok(None)
    }
}

fn validate(ops: &[StackOperation]) -> Result<(), HistoryError> {
    for (index, op) in ops.iter().enumerate() {
        if op.returned_at < op.invoked_at {
            return Err(HistoryError::InvertedInterval {
                index,
                invoked_at: op.invoked_at,
                returned_at: op.returned_at,
            });
        }
        if op.op_type != StackOpType::PopEmpty && op.element.is_none() {
            return Err(HistoryError::MissingElement {
                index,
                op_type: op.op_type,
            });
        }
    }
    Ok(())
}

fn replay_sequential(ops: &[StackOperation]) -> Option<Vec<usize>> {
    let mut order: Vec<usize> = (0..ops.len()).collect();
    order.sort_by_key(|&i| (ops[i].invoked_at, ops[i].returned_at));

    let mut stack = Vec::new();
    for &i in &order {
        apply(&mut stack, &ops[i])?;
    }
    Some(order)
}

/// Apply `op` to the model stack, returning `None` if its recorded result
/// is impossible in the current state.
fn apply(stack: &mut Vec<u64>, op: &StackOperation) -> Option<()> {
    match (op.op_type, op.element) {
        (StackOpType::Push, Some(v)) => stack.push(v),
        (StackOpType::Pop, Some(v)) if stack.last() == Some(&v) => {
            stack.pop();
        }
        (StackOpType::PopEmpty, _) if stack.is_empty() => {}
        _ => return None,
    }
    Some(())
}

fn undo(stack: &mut Vec<u64>, op: &StackOperation) {
    match (op.op_type, op.element) {
        (StackOpType::Push, Some(_)) => {
            stack.pop();
        }
        (StackOpType::Pop, Some(v)) => stack.push(v),
        _ => {}
    }
}

struct Search<'h> {
    ops: &'h [StackOperation],
    stack: Vec<u64>,
    order: Vec<usize>,
    visited: HashSet<(u64, Vec<u64>)>,
}

impl Search<'_> {
    fn explore(&mut self, done: u64, all_done: u64) -> bool {
        if done == all_done {
            return true;
        }
        if !self.visited.insert((done, self.stack.clone())) {
            return false;
        }

        let ops = self.ops;
        let pending = |i: &usize| done & (1u64 << i) == 0;

        // Anything invoked after the earliest pending response cannot go next.
        let horizon = (0..ops.len())
            .filter(pending)
            .map(|i| ops[i].returned_at)
            .min()
            .unwrap_or(u64::MAX);

        let candidates: Vec<usize> = (0..ops.len())
            .filter(pending)
            .filter(|&i| ops[i].invoked_at <= horizon)
            .collect();

        for i in candidates {
            let op = &ops[i];
            if apply(&mut self.stack, op).is_none() {
                continue;
            }
            self.order.push(i);
            if self.explore(done | (1u64 << i), all_done) {
                return true;
            }
            self.order.pop();
            undo(&mut self.stack, op);
        }

        false
    }
}
