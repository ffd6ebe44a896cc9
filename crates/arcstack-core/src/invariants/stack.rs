//! Stack invariants.
//!
//! | Property | Description |
//! |----------|-------------|
//! | NoLostElements | Every pushed element is in the stack or was popped |
//! | NoDuplicates | No element is observed more often than it was pushed |
//! | NoPhantomElements | Nothing is observed that was never pushed |
//! | LIFO_Order | A sequential history replays on a plain `Vec` |
//! | Linearizability | Some real-time-respecting order replays on a plain `Vec` |

use std::collections::HashMap;

use crate::counterexample::{Counterexample, StateSnapshot};
use crate::invariants::linearizability::check_linearizable;
use crate::property::{PropertyChecker, PropertyResult};

/// Properties that any stack implementation must expose for checking.
///
/// Checks are only meaningful at quiescent points: no push or pop may be
/// in flight while the checker reads the state.
pub trait StackProperties {
    /// Current contents of the stack (top to bottom).
    fn current_contents(&self) -> Vec<u64>;

    /// Complete operation history since the stack was created.
    fn history(&self) -> StackHistory;

    /// Every element that has been pushed, in history order.
    fn pushed_elements(&self) -> Vec<u64> {
        self.history().pushed()
    }

    /// Every element that has been popped, in history order.
    fn popped_elements(&self) -> Vec<u64> {
        self.history().popped()
    }
}

/// History of stack operations.
///
/// Each operation carries the logical times of its invocation and
/// response. Two operations overlap when neither returned before the
/// other was invoked.
#[derive(Debug, Clone, Default)]
pub struct StackHistory {
    /// Operations in the order they were recorded
    pub operations: Vec<StackOperation>,
}

/// A single completed stack operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackOperation {
    /// Thread that performed the operation
    pub thread_id: u64,
    /// Type of operation
    pub op_type: StackOpType,
    /// Element pushed, or element returned by pop
    pub element: Option<u64>,
    /// Logical time the call started
    pub invoked_at: u64,
    /// Logical time the call returned
    pub returned_at: u64,
}

/// Type of stack operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackOpType {
    Push,
    Pop,
    PopEmpty,
}

impl StackHistory {
    /// Create a new empty history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    /// Record a completed push.
    pub fn record_push(&mut self, thread_id: u64, element: u64, invoked_at: u64, returned_at: u64) {
        debug_assert!(invoked_at <= returned_at, "Response precedes invocation");
        self.operations.push(StackOperation {
            thread_id,
            op_type: StackOpType::Push,
            element: Some(element),
            invoked_at,
            returned_at,
        });
    }

    /// Record a completed pop; `None` records a pop that found the stack empty.
    pub fn record_pop(
        &mut self,
        thread_id: u64,
        element: Option<u64>,
        invoked_at: u64,
        returned_at: u64,
    ) {
        debug_assert!(invoked_at <= returned_at, "Response precedes invocation");
        self.operations.push(StackOperation {
            thread_id,
            op_type: if element.is_some() {
                StackOpType::Pop
            } else {
                StackOpType::PopEmpty
            },
            element,
            invoked_at,
            returned_at,
        });
    }

    /// Number of recorded operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Elements pushed, in record order.
    #[must_use]
    pub fn pushed(&self) -> Vec<u64> {
        self.elements_of(StackOpType::Push)
    }

    /// Elements popped, in record order.
    #[must_use]
    pub fn popped(&self) -> Vec<u64> {
        self.elements_of(StackOpType::Pop)
    }

    fn elements_of(&self, op_type: StackOpType) -> Vec<u64> {
        self.operations
            .iter()
            .filter(|op| op.op_type == op_type)
            .filter_map(|op| op.element)
            .collect()
    }

    /// Operations sorted by invocation time.
    #[must_use]
    pub fn by_invocation(&self) -> Vec<&StackOperation> {
        let mut ops: Vec<&StackOperation> = self.operations.iter().collect();
        ops.sort_by_key(|op| (op.invoked_at, op.returned_at));
        ops
    }

    /// Whether no two operations overlap in time.
    #[must_use]
    pub fn is_sequential(&self) -> bool {
        self.by_invocation()
            .windows(2)
            .all(|pair| pair[0].returned_at < pair[1].invoked_at)
    }
}

/// Property checker for stack implementations.
pub struct StackPropertyChecker<'a, T: StackProperties> {
    stack: &'a T,
    dst_seed: Option<u64>,
}

impl<'a, T: StackProperties> StackPropertyChecker<'a, T> {
    /// Create a new checker for the given stack.
    #[must_use]
    pub fn new(stack: &'a T) -> Self {
        Self {
            stack,
            dst_seed: None,
        }
    }

    /// Set DST seed for counterexample reproduction.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        debug_assert!(seed != 0, "DST seed should not be zero");
        self.dst_seed = Some(seed);
        self
    }

    fn counterexample(&self, history: &StackHistory, description: String) -> Counterexample {
        Counterexample::from_history(history, self.dst_seed).with_description(description)
    }

    /// Every element that was pushed must either be in the stack
    /// or have been popped, as many times as it was pushed.
    fn check_no_lost_elements(&self, observed: &HashMap<u64, usize>) -> PropertyResult {
        let pushed = count(self.stack.pushed_elements());

        let mut lost: Vec<u64> = pushed
            .iter()
            .filter(|&(element, &times)| observed.get(element).copied().unwrap_or(0) < times)
            .map(|(&element, _)| element)
            .collect();
        lost.sort_unstable();

        match lost.first() {
            None => PropertyResult::pass("NoLostElements"),
            Some(&element) => {
                let mut ce = match self.dst_seed {
                    Some(seed) => Counterexample::with_seed(seed),
                    None => Counterexample::new(),
                };
                ce.add_state(StateSnapshot {
                    step: 1,
                    description: format!("Element {} lost", element),
                    variables: vec![
                        ("lost".to_string(), format!("{:?}", lost)),
                        ("popped".to_string(), format!("{:?}", self.stack.popped_elements())),
                        ("contents".to_string(), format!("{:?}", self.stack.current_contents())),
                    ],
                });

                PropertyResult::fail(
                    "NoLostElements",
                    format!(
                        "Element {} was pushed but is neither in stack nor popped",
                        element
                    ),
                    Some(ce),
                )
            }
        }
    }

    /// No element may be observed (in the stack or popped) more often than
    /// it was pushed.
    fn check_no_duplicates(&self, observed: &HashMap<u64, usize>) -> PropertyResult {
        let pushed = count(self.stack.pushed_elements());

        let mut duplicated: Vec<(u64, usize)> = observed
            .iter()
            .filter_map(|(element, &times)| {
                let allowed = pushed.get(element).copied().unwrap_or(0);
                (allowed > 0 && times > allowed).then_some((*element, times))
            })
            .collect();
        duplicated.sort_unstable();

        match duplicated.first() {
            None => PropertyResult::pass("NoDuplicates"),
            Some(&(element, times)) => PropertyResult::fail(
                "NoDuplicates",
                format!("Element {} observed {} times", element, times),
                None,
            ),
        }
    }

    /// Nothing may come out of the stack that never went in.
    fn check_no_phantom_elements(&self, observed: &HashMap<u64, usize>) -> PropertyResult {
        let pushed = count(self.stack.pushed_elements());

        let mut phantoms: Vec<u64> = observed
            .keys()
            .filter(|element| !pushed.contains_key(*element))
            .copied()
            .collect();
        phantoms.sort_unstable();

        match phantoms.first() {
            None => PropertyResult::pass("NoPhantomElements"),
            Some(element) => PropertyResult::fail(
                "NoPhantomElements",
                format!("Element {} observed but never pushed", element),
                None,
            ),
        }
    }

    /// A sequential history must replay exactly on a plain `Vec`, and the
    /// replay must end in the stack's current contents.
    ///
    /// Histories with overlapping operations are left to
    /// `check_linearizability`.
    fn check_lifo_order(&self, history: &StackHistory) -> PropertyResult {
        if !history.is_sequential() {
            return PropertyResult::pass("LIFO_Order");
        }

        let mut model_stack: Vec<u64> = Vec::new();

        for op in history.by_invocation() {
            let mismatch = match (op.op_type, op.element) {
                (StackOpType::Push, Some(e)) => {
                    model_stack.push(e);
                    None
                }
                (StackOpType::Pop, Some(actual)) => match model_stack.pop() {
                    Some(expected) if expected == actual => None,
                    Some(expected) => Some(format!(
                        "Pop returned {} but LIFO expected {}",
                        actual, expected
                    )),
                    None => Some(format!("Pop returned {} from an empty stack", actual)),
                },
                (StackOpType::PopEmpty, _) if !model_stack.is_empty() => Some(format!(
                    "Pop reported empty while {} elements were present",
                    model_stack.len()
                )),
                _ => None,
            };

            if let Some(violation) = mismatch {
                let ce = self.counterexample(history, violation.clone());
                return PropertyResult::fail("LIFO_Order", violation, Some(ce));
            }
        }

        let replayed: Vec<u64> = model_stack.into_iter().rev().collect();
        let contents = self.stack.current_contents();
        if replayed != contents {
            let violation = format!(
                "Replay ends with {:?} but stack holds {:?}",
                replayed, contents
            );
            let ce = self.counterexample(history, violation.clone());
            return PropertyResult::fail("LIFO_Order", violation, Some(ce));
        }

        PropertyResult::pass("LIFO_Order")
    }

    /// All operations appear to take effect atomically at some point
    /// between their invocation and response.
    fn check_linearizability(&self, history: &StackHistory) -> PropertyResult {
        match check_linearizable(history) {
            Ok(Some(_)) => PropertyResult::pass("Linearizability"),
            Ok(None) => {
                let violation = format!(
                    "No sequential order of {} operations explains the observed pops",
                    history.len()
                );
                let ce = self.counterexample(history, violation.clone());
                PropertyResult::fail("Linearizability", violation, Some(ce))
            }
            Err(e) => PropertyResult::fail("Linearizability", e.to_string(), None),
        }
    }
}

impl<T: StackProperties> PropertyChecker for StackPropertyChecker<'_, T> {
    fn check_all(&self) -> Vec<PropertyResult> {
        let history = self.stack.history();
        let observed = count(
            self.stack
                .popped_elements()
                .into_iter()
                .chain(self.stack.current_contents()),
        );

        vec![
            self.check_no_lost_elements(&observed),
            self.check_no_duplicates(&observed),
            self.check_no_phantom_elements(&observed),
            self.check_lifo_order(&history),
            self.check_linearizability(&history),
        ]
    }
}

fn count(elements: impl IntoIterator<Item = u64>) -> HashMap<u64, usize> {
    let mut counts = HashMap::new();
    for element in elements {
        *counts.entry(element).or_insert(0) += 1;
    }
    counts
}
