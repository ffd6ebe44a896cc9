//! Stateright model of the reference-counted stack.
//!
//! Nodes carry explicit reference counts. A count is held by the head slot
//! for the top node, by every published node for its `prev`, and by every
//! thread for each handle it owns. A node is reclaimed when its count drops
//! to zero, releasing its `prev` in turn.
//!
//! Two load protocols are modelled:
//!
//! - [`ReclaimProtocol::Protected`]: reading the head and taking a count on
//!   it is a single step. This is what the epoch pin around a load buys.
//! - [`ReclaimProtocol::SplitLoad`]: the read and the increment are separate
//!   steps, so a concurrent pop can reclaim the node in between. The checker
//!   finds the resulting use-after-free.

use std::collections::{BTreeMap, BTreeSet};

use arcstack_core::{Counterexample, MemoryIssue, StateSnapshot, ThreadAction};
use stateright::{Model, Path, Property};

/// Unique identifier for a node.
pub type NodeId = u64;

/// Unique identifier for a thread.
pub type ThreadId = u64;

/// Maximum threads in a model; larger runs do not finish in test time.
pub const THREADS_COUNT_MAX: u64 = 4;

/// How a pop takes its handle on the head node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReclaimProtocol {
    /// Pointer read and count increment happen atomically.
    Protected,
    /// Pointer read, then count increment as a separate step.
    SplitLoad,
}

/// A node with its reference count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RcNode {
    pub value: u64,
    pub prev: Option<NodeId>,
    pub refs: u32,
    pub reclaimed: bool,
}

/// Thread-local state for ongoing operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ThreadState {
    Idle,
    /// Owns an unpublished node whose `prev` holds a count on the observed head.
    PushAllocated { node: NodeId },
    /// Read the head pointer without holding a count on it.
    PopLoadedPtr { node: NodeId },
    /// Holds a counted handle on the observed head.
    PopLoaded { node: NodeId },
    /// Won the pop; still holds the detached node.
    PopHolding { node: NodeId },
}

/// State of the reference-counted stack model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefStackState {
    /// Node the head slot points to
    pub head: Option<NodeId>,
    /// Every node ever allocated, reclaimed ones included
    pub nodes: BTreeMap<NodeId, RcNode>,
    /// Counter for allocating new node IDs
    pub node_id_next: NodeId,
    /// Values whose push CAS succeeded
    pub pushed: BTreeSet<u64>,
    /// Values returned by pops, sorted, duplicates kept
    pub popped: Vec<u64>,
    /// Thread states
    pub threads: BTreeMap<ThreadId, ThreadState>,
    /// First use-after-free observed, as (node, thread)
    pub use_after_free: Option<(NodeId, ThreadId)>,
    /// First node whose count was released past zero
    pub double_free: Option<NodeId>,
}

impl RefStackState {
    /// Create initial state with given number of threads.
    pub fn new(threads_count: u64) -> Self {
        debug_assert!(threads_count > 0, "Must have at least one thread");
        debug_assert!(
            threads_count <= THREADS_COUNT_MAX,
            "Model checking with many threads is slow"
        );

        Self {
            head: None,
            nodes: BTreeMap::new(),
            node_id_next: 0,
            pushed: BTreeSet::new(),
            popped: Vec::new(),
            threads: (0..threads_count).map(|tid| (tid, ThreadState::Idle)).collect(),
            use_after_free: None,
            double_free: None,
        }
    }

    /// Values on the stack, top first.
    pub fn contents(&self) -> Vec<u64> {
        self.chain().filter_map(|id| self.nodes.get(&id)).map(|n| n.value).collect()
    }

    /// Node ids reachable from the head slot.
    fn chain(&self) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.head, |id| self.nodes.get(id).and_then(|n| n.prev))
            .take(self.nodes.len())
    }

    fn memory_error(&self) -> bool {
        self.use_after_free.is_some() || self.double_free.is_some()
    }

    /// Take a counted handle on `node`.
    fn acquire(&mut self, node: NodeId, thread: ThreadId) {
        match self.nodes.get_mut(&node) {
            Some(n) if !n.reclaimed => {
                n.refs += 1;
                return;
            }
            _ => {}
        }
        self.flag_use_after_free(node, thread);
    }

    /// Drop a counted handle on `node`, reclaiming down the chain.
    fn release(&mut self, node: NodeId) {
        let mut current = Some(node);
        while let Some(id) = current.take() {
            let Some(n) = self.nodes.get_mut(&id) else {
                return;
            };
            if n.refs == 0 {
                self.double_free.get_or_insert(id);
                return;
            }
            n.refs -= 1;
            if n.refs == 0 {
                n.reclaimed = true;
                current = n.prev;
            }
        }
    }

    /// Read a node's fields through a handle.
    fn read(&mut self, node: NodeId, thread: ThreadId) -> Option<(u64, Option<NodeId>)> {
        let n = self.nodes.get(&node)?;
        let (fields, reclaimed) = ((n.value, n.prev), n.reclaimed);
        if reclaimed {
            self.flag_use_after_free(node, thread);
        }
        Some(fields)
    }

    fn flag_use_after_free(&mut self, node: NodeId, thread: ThreadId) {
        self.use_after_free.get_or_insert((node, thread));
    }

    fn record_pop(&mut self, value: u64) {
        let at = self.popped.partition_point(|&v| v <= value);
        self.popped.insert(at, value);
    }

    /// Every pushed value is on the stack or was popped.
    pub fn no_lost_elements(&self) -> bool {
        let contents: BTreeSet<u64> = self.contents().into_iter().collect();
        self.pushed
            .iter()
            .all(|v| contents.contains(v) || self.popped.binary_search(v).is_ok())
    }

    /// No value is observed twice across the stack and the pops.
    pub fn no_duplicates(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.contents()
            .into_iter()
            .chain(self.popped.iter().copied())
            .all(|v| seen.insert(v))
    }

    /// No reclaimed node was touched, and none is reachable or held.
    pub fn no_use_after_free(&self) -> bool {
        if self.use_after_free.is_some() {
            return false;
        }
        let held = self.threads.values().filter_map(|t| match t {
            ThreadState::PushAllocated { node }
            | ThreadState::PopLoaded { node }
            | ThreadState::PopHolding { node } => Some(*node),
            ThreadState::Idle | ThreadState::PopLoadedPtr { .. } => None,
        });
        self.chain()
            .chain(held)
            .all(|id| self.nodes.get(&id).map_or(false, |n| !n.reclaimed))
    }

    /// No count was released past zero.
    pub fn no_double_free(&self) -> bool {
        self.double_free.is_none()
    }

    /// Combined invariant check.
    pub fn invariants_hold(&self) -> bool {
        self.no_lost_elements()
            && self.no_duplicates()
            && self.no_use_after_free()
            && self.no_double_free()
    }
}

/// Actions that threads can take.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RefStackAction {
    /// Allocate a node and link it to a counted load of the head
    PushAlloc { thread: ThreadId, value: u64 },
    /// Publish the node, or reload the head into `prev` on failure
    PushCas { thread: ThreadId },
    /// Read the head (and, when protected, take a count on it)
    PopLoad { thread: ThreadId },
    /// Take a count on the previously read head
    PopIncrement { thread: ThreadId },
    /// Swing the head to `prev`, or drop the handle on failure
    PopCas { thread: ThreadId },
    /// Drop the handle on a detached node
    Release { thread: ThreadId },
}

impl RefStackAction {
    /// Thread performing the action.
    pub fn thread(&self) -> ThreadId {
        match *self {
            Self::PushAlloc { thread, .. }
            | Self::PushCas { thread }
            | Self::PopLoad { thread }
            | Self::PopIncrement { thread }
            | Self::PopCas { thread }
            | Self::Release { thread } => thread,
        }
    }

    fn label(&self) -> String {
        match self {
            Self::PushAlloc { value, .. } => format!("alloc({})", value),
            Self::PushCas { .. } => "push_cas".to_string(),
            Self::PopLoad { .. } => "pop_load".to_string(),
            Self::PopIncrement { .. } => "increment".to_string(),
            Self::PopCas { .. } => "pop_cas".to_string(),
            Self::Release { .. } => "release".to_string(),
        }
    }
}

/// Model for bounded model checking.
pub struct RefStackModel {
    pub threads_count: u64,
    pub values: Vec<u64>,
    pub protocol: ReclaimProtocol,
}

impl RefStackModel {
    /// Create a model of the protected protocol.
    pub fn new(threads_count: u64, values: Vec<u64>) -> Self {
        Self::with_protocol(threads_count, values, ReclaimProtocol::Protected)
    }

    /// Create a model with an explicit load protocol.
    pub fn with_protocol(threads_count: u64, values: Vec<u64>, protocol: ReclaimProtocol) -> Self {
        debug_assert!(threads_count > 0);
        debug_assert!(!values.is_empty());

        Self {
            threads_count,
            values,
            protocol,
        }
    }

    fn in_flight(state: &RefStackState) -> BTreeSet<u64> {
        state
            .threads
            .values()
            .filter_map(|t| match t {
                ThreadState::PushAllocated { node } => state.nodes.get(node).map(|n| n.value),
                _ => None,
            })
            .collect()
    }
}

impl Model for RefStackModel {
    type State = RefStackState;
    type Action = RefStackAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![RefStackState::new(self.threads_count)]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        // Nothing after a memory error is meaningful.
        if state.memory_error() {
            return;
        }

        let in_flight = Self::in_flight(state);

        for (&thread, thread_state) in &state.threads {
            match thread_state {
                ThreadState::Idle => {
                    for &value in &self.values {
                        if !state.pushed.contains(&value) && !in_flight.contains(&value) {
                            actions.push(RefStackAction::PushAlloc { thread, value });
                        }
                    }
                    if state.head.is_some() {
                        actions.push(RefStackAction::PopLoad { thread });
                    }
                }
                ThreadState::PushAllocated { .. } => {
                    actions.push(RefStackAction::PushCas { thread });
                }
                ThreadState::PopLoadedPtr { .. } => {
                    actions.push(RefStackAction::PopIncrement { thread });
                }
                ThreadState::PopLoaded { .. } => {
                    actions.push(RefStackAction::PopCas { thread });
                }
                ThreadState::PopHolding { .. } => {
                    actions.push(RefStackAction::Release { thread });
                }
            }
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();

        match action {
            RefStackAction::PushAlloc { thread, value } => {
                let node = next.node_id_next;
                next.node_id_next += 1;

                let prev = next.head;
                if let Some(head) = prev {
                    next.acquire(head, thread);
                }
                next.nodes.insert(
                    node,
                    RcNode {
                        value,
                        prev,
                        refs: 1,
                        reclaimed: false,
                    },
                );
                next.threads.insert(thread, ThreadState::PushAllocated { node });
            }

            RefStackAction::PushCas { thread } => {
                let Some(ThreadState::PushAllocated { node }) = next.threads.get(&thread).cloned()
                else {
                    return None;
                };
                let (value, prev) = next.read(node, thread)?;

                if next.head == prev {
                    // The thread's count on the node moves into the slot; the
                    // slot's count on the old head is dropped, `prev` keeps one.
                    next.head = Some(node);
                    if let Some(old) = prev {
                        next.release(old);
                    }
                    next.pushed.insert(value);
                    next.threads.insert(thread, ThreadState::Idle);
                } else {
                    let current = next.head;
                    if let Some(head) = current {
                        next.acquire(head, thread);
                    }
                    if let Some(old) = prev {
                        next.release(old);
                    }
                    if let Some(n) = next.nodes.get_mut(&node) {
                        n.prev = current;
                    }
                }
            }

            RefStackAction::PopLoad { thread } => {
                let head = next.head?;
                match self.protocol {
                    ReclaimProtocol::Protected => {
                        next.acquire(head, thread);
                        next.threads.insert(thread, ThreadState::PopLoaded { node: head });
                    }
                    ReclaimProtocol::SplitLoad => {
                        next.threads
                            .insert(thread, ThreadState::PopLoadedPtr { node: head });
                    }
                }
            }

            RefStackAction::PopIncrement { thread } => {
                let Some(ThreadState::PopLoadedPtr { node }) = next.threads.get(&thread).cloned()
                else {
                    return None;
                };
                next.acquire(node, thread);
                next.threads.insert(thread, ThreadState::PopLoaded { node });
            }

            RefStackAction::PopCas { thread } => {
                let Some(ThreadState::PopLoaded { node }) = next.threads.get(&thread).cloned()
                else {
                    return None;
                };

                if next.head == Some(node) {
                    let (value, prev) = next.read(node, thread)?;
                    if let Some(p) = prev {
                        next.acquire(p, thread);
                    }
                    next.head = prev;
                    next.release(node);
                    next.record_pop(value);
                    next.threads.insert(thread, ThreadState::PopHolding { node });
                } else {
                    next.release(node);
                    next.threads.insert(thread, ThreadState::Idle);
                }
            }

            RefStackAction::Release { thread } => {
                let Some(ThreadState::PopHolding { node }) = next.threads.get(&thread).cloned()
                else {
                    return None;
                };
                next.release(node);
                next.threads.insert(thread, ThreadState::Idle);
            }
        }

        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("NoLostElements", |_: &Self, state: &RefStackState| {
                state.no_lost_elements()
            }),
            Property::always("NoDuplicates", |_: &Self, state: &RefStackState| {
                state.no_duplicates()
            }),
            Property::always("NoUseAfterFree", |_: &Self, state: &RefStackState| {
                state.no_use_after_free()
            }),
            Property::always("NoDoubleFree", |_: &Self, state: &RefStackState| {
                state.no_double_free()
            }),
            Property::sometimes("StackDrained", |model: &Self, state: &RefStackState| {
                state.head.is_none() && state.popped.len() == model.values.len()
            }),
        ]
    }
}

/// Convert a checker discovery into a renderable counterexample.
///
/// Action `i` of the path is shown at step `i + 1`; memory issues are
/// stamped with the step of the action that first raised them.
pub fn counterexample_from_path(
    path: Path<RefStackState, RefStackAction>,
    description: &str,
) -> Counterexample {
    let mut ce = Counterexample::new().with_description(description.to_string());
    let mut use_after_free_at = None;
    let mut double_free_at = None;

    for (step, (state, action)) in (0u64..).zip(path.into_vec()) {
        if state.use_after_free.is_some() && use_after_free_at.is_none() {
            use_after_free_at = Some(step);
        }
        if state.double_free.is_some() && double_free_at.is_none() {
            double_free_at = Some(step);
        }

        let Some(action) = action else {
            ce.add_state(snapshot(&state, step));
            if let (Some((node, thread_id)), Some(step)) = (state.use_after_free, use_after_free_at) {
                ce.add_memory_issue(MemoryIssue::UseAfterFree {
                    node,
                    thread_id,
                    step,
                });
            }
            if let (Some(node), Some(step)) = (state.double_free, double_free_at) {
                ce.add_memory_issue(MemoryIssue::DoubleFree { node, step });
            }
            continue;
        };

        ce.add_action(ThreadAction {
            thread_id: action.thread(),
            step: step + 1,
            action: action.label(),
            success: true,
        });
    }

    ce
}

fn snapshot(state: &RefStackState, step: u64) -> StateSnapshot {
    let refs = state
        .nodes
        .iter()
        .map(|(id, n)| {
            let mark = if n.reclaimed { " freed" } else { "" };
            format!("N{}={}{}", id, n.refs, mark)
        })
        .collect::<Vec<_>>()
        .join(", ");
    let head = state.head.map_or("-".to_string(), |h| format!("N{}", h));

    StateSnapshot {
        step,
        description: format!("head={}", head),
        variables: vec![
            ("refs".to_string(), refs),
            ("contents".to_string(), format!("{:?}", state.contents())),
        ],
    }
}
