//! Counterexample representation and rendering.
//!
//! When a property violation is detected, a counterexample shows the
//! sequence of thread actions that led to the failure, laid out one
//! column per thread.

use std::fmt;

use crate::invariants::stack::{StackHistory, StackOpType};

/// Column width used by the thread diagram.
const COLUMN_WIDTH: usize = 14;

/// A counterexample showing the failure path.
#[derive(Debug, Clone, Default)]
pub struct Counterexample {
    /// Sequence of state snapshots
    pub states: Vec<StateSnapshot>,
    /// Thread interleaving that caused the failure
    pub interleaving: Vec<ThreadAction>,
    /// Memory-related issues detected
    pub memory_issues: Vec<MemoryIssue>,
    /// DST seed for reproduction (if applicable)
    pub dst_seed: Option<u64>,
    /// Human-readable description of the failure
    pub description: Option<String>,
}

/// Snapshot of system state at a point in time.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Step number in the execution
    pub step: u64,
    /// Description of the state
    pub description: String,
    /// Variable values at this point
    pub variables: Vec<(String, String)>,
}

/// Action taken by a thread.
#[derive(Debug, Clone)]
pub struct ThreadAction {
    /// Thread identifier
    pub thread_id: u64,
    /// Step number when this action occurred
    pub step: u64,
    /// Description of the action
    pub action: String,
    /// Whether this action succeeded
    pub success: bool,
}

/// Reclamation error observed in a model run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryIssue {
    /// A thread dereferenced a node after its storage was reclaimed.
    UseAfterFree {
        node: u64,
        thread_id: u64,
        step: u64,
    },
    /// A reference count was released after already reaching zero.
    DoubleFree { node: u64, step: u64 },
}

impl Counterexample {
    /// Create a new empty counterexample.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a counterexample with DST seed for reproduction.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        debug_assert!(seed != 0, "DST seed should not be zero");
        Self {
            dst_seed: Some(seed),
            ..Self::default()
        }
    }

    /// Build a counterexample from a recorded stack history.
    ///
    /// Each operation becomes one action at its response step; empty pops
    /// are shown as failed actions.
    #[must_use]
    pub fn from_history(history: &StackHistory, dst_seed: Option<u64>) -> Self {
        let mut ce = Self {
            dst_seed,
            ..Self::default()
        };

        for op in &history.operations {
            let action = match (op.op_type, op.element) {
                (StackOpType::Push, Some(v)) => format!("push({})", v),
                (StackOpType::Pop, Some(v)) => format!("pop()={}", v),
                _ => "pop()=None".to_string(),
            };
            ce.add_action(ThreadAction {
                thread_id: op.thread_id,
                step: op.returned_at,
                action,
                success: op.op_type != StackOpType::PopEmpty,
            });
        }

        ce
    }

    /// Set the description for this counterexample.
    #[must_use]
    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    /// Add a state snapshot.
    pub fn add_state(&mut self, state: StateSnapshot) {
        debug_assert!(
            self.states.last().map_or(true, |last| state.step > last.step),
            "States must be added in order"
        );
        self.states.push(state);
    }

    /// Add a thread action.
    pub fn add_action(&mut self, action: ThreadAction) {
        self.interleaving.push(action);
    }

    /// Add a memory issue.
    pub fn add_memory_issue(&mut self, issue: MemoryIssue) {
        self.memory_issues.push(issue);
    }

    /// Render the counterexample as a human-readable thread diagram.
    ///
    /// ```text
    /// DST_SEED=12345
    ///
    /// Step | Thread 0     | Thread 1     | State
    /// -----|--------------|--------------|------
    ///    1 | push(1)      |              | head=N0
    ///    2 |              | pop()=1      | head=-
    /// ```
    ///
    /// Only steps that carry an action or a state snapshot are printed.
    #[must_use]
    pub fn render_diagram(&self) -> String {
        let mut output = String::new();

        if let Some(seed) = self.dst_seed {
            output.push_str(&format!("DST_SEED={}\n\n", seed));
        }

        if let Some(ref desc) = self.description {
            output.push_str("Failure: ");
            output.push_str(desc);
            output.push_str("\n\n");
        }

        let mut threads: Vec<u64> = self.interleaving.iter().map(|a| a.thread_id).collect();
        threads.sort_unstable();
        threads.dedup();

        if threads.is_empty() {
            output.push_str("(no thread actions recorded)\n");
        } else {
            output.push_str("Step |");
            for tid in &threads {
                output.push_str(&format!(" {:<w$} |", format!("Thread {}", tid), w = COLUMN_WIDTH));
            }
            output.push_str(" State\n");

            output.push_str("-----|");
            for _ in &threads {
                output.push_str(&"-".repeat(COLUMN_WIDTH + 2));
                output.push('|');
            }
            output.push_str("------\n");

            let mut steps: Vec<u64> = self
                .interleaving
                .iter()
                .map(|a| a.step)
                .chain(self.states.iter().map(|s| s.step))
                .collect();
            steps.sort_unstable();
            steps.dedup();

            for step in steps {
                output.push_str(&format!("{:4} |", step));

                for tid in &threads {
                    let action = self
                        .interleaving
                        .iter()
                        .find(|a| a.step == step && a.thread_id == *tid);

                    let cell = match action {
                        Some(a) if a.success => a.action.clone(),
                        Some(a) => format!("{} [FAIL]", a.action),
                        None => String::new(),
                    };
                    output.push_str(&format!(" {:<w$} |", cell, w = COLUMN_WIDTH));
                }

                if let Some(state) = self.states.iter().find(|s| s.step == step) {
                    output.push(' ');
                    output.push_str(&state.description);
                }

                output.push('\n');
            }
        }

        if !self.memory_issues.is_empty() {
            output.push_str("\nMemory Issues:\n");
            for issue in &self.memory_issues {
                output.push_str(&format!("  - {}\n", issue));
            }
        }

        output
    }
}

impl fmt::Display for MemoryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryIssue::UseAfterFree {
                node,
                thread_id,
                step,
            } => write!(
                f,
                "Use-after-free: thread {} touched reclaimed node N{} at step {}",
                thread_id, node, step
            ),
            MemoryIssue::DoubleFree { node, step } => write!(
                f,
                "Double free: node N{} released past zero at step {}",
                node, step
            ),
        }
    }
}
