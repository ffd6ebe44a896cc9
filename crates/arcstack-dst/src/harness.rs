//! DST harness for stack workloads.
//!
//! Simulated threads take turns issuing push and pop calls against the
//! stack under test. The scheduler picks whose turn it is, the fault
//! injector stalls or crashes threads and jumps the clock, and every pop
//! result is compared against a sequential reference model.

use std::fmt;

use arcstack_core::{Counterexample, StackHistory};

use crate::config::DstConfig;
use crate::env::{DstEnv, DstStats};
use crate::fault::Fault;
use crate::scheduler::ScheduleDecision;

/// Simulated nanoseconds charged for each operation.
const OPERATION_COST_NS: u64 = 1_000;

/// Operations shown in a violation's counterexample, counted back from the
/// failing one.
const COUNTEREXAMPLE_OPERATIONS_MAX: usize = 32;

/// Result of running the harness.
#[derive(Debug, Clone)]
pub struct HarnessReport {
    /// Seed used for reproduction
    pub seed: u64,
    /// Total operations executed
    pub operations_count: u64,
    /// Pushes executed
    pub pushes_count: u64,
    /// Pops that returned a value
    pub pops_count: u64,
    /// Pops that found the stack empty
    pub empty_pops_count: u64,
    /// Context switches that occurred
    pub context_switches_count: u64,
    /// Turns lost to injected stalls
    pub stalls_count: u64,
    /// Threads stopped by injected crashes
    pub crashed_threads_count: u64,
    /// Invariant checks performed
    pub invariant_checks_count: u64,
    /// Simulated time at the end of the run
    pub elapsed_ns: u64,
    /// First violation (if any)
    pub first_violation: Option<String>,
    /// Recent operations leading up to a reference-model mismatch
    pub counterexample: Option<Counterexample>,
}

impl HarnessReport {
    /// Whether the run finished without a violation.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.first_violation.is_none()
    }
}

impl fmt::Display for HarnessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed() { "PASS" } else { "FAIL" };
        write!(
            f,
            "[{}] DST_SEED={} ops={} push={} pop={} empty={} switches={} stalls={} crashed={} checks={} elapsed={}us",
            status,
            self.seed,
            self.operations_count,
            self.pushes_count,
            self.pops_count,
            self.empty_pops_count,
            self.context_switches_count,
            self.stalls_count,
            self.crashed_threads_count,
            self.invariant_checks_count,
            self.elapsed_ns / 1_000
        )?;

        if let Some(violation) = &self.first_violation {
            write!(f, "\n  Violation: {}", violation)?;
        }
        if let Some(ce) = &self.counterexample {
            write!(f, "\n{}", ce.render_diagram())?;
        }
        Ok(())
    }
}

/// How far a simulated thread is through its operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadState {
    Running { step: u64 },
    Done,
    Crashed,
}

impl ThreadState {
    fn is_running(&self) -> bool {
        matches!(self, ThreadState::Running { .. })
    }
}

/// DST harness for concurrent stack testing.
///
/// Given the same seed and config, the same interleaving, the same values
/// and the same faults are produced.
pub struct DstHarness {
    env: DstEnv,
    config: DstConfig,
    threads: Vec<ThreadState>,
    model: Vec<u64>,
    history: StackHistory,
    report: HarnessReport,
}

impl DstHarness {
    /// Create a new harness with the given seed and config.
    pub fn new(seed: u64, config: DstConfig) -> Self {
        config.validate();

        let env = DstEnv::new(
            seed,
            config.threads_count,
            config.yield_probability,
            config.fault_config.clone(),
        );
        let threads = vec![ThreadState::Running { step: 0 }; config.threads_count];

        Self {
            env,
            config,
            threads,
            model: Vec::new(),
            history: StackHistory::new(),
            report: HarnessReport {
                seed,
                operations_count: 0,
                pushes_count: 0,
                pops_count: 0,
                empty_pops_count: 0,
                context_switches_count: 0,
                stalls_count: 0,
                crashed_threads_count: 0,
                invariant_checks_count: 0,
                elapsed_ns: 0,
                first_violation: None,
                counterexample: None,
            },
        }
    }

    /// Get the seed for reproduction.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.env.seed()
    }

    /// Value pushed by `thread` at `step`.
    ///
    /// Values are unique across the run and never zero.
    #[must_use]
    pub fn value_for(&self, thread: usize, step: u64) -> u64 {
        thread as u64 * self.config.operations_per_thread + step + 1
    }

    /// Run the workload.
    ///
    /// `push` and `pop` forward to the stack under test on behalf of a
    /// simulated thread. `check` is called every `invariant_check_interval`
    /// operations and once at the end.
    pub fn run<P, Q, C>(&mut self, mut push: P, mut pop: Q, mut check: C) -> HarnessReport
    where
        P: FnMut(usize, u64),
        Q: FnMut(usize) -> Option<u64>,
        C: FnMut() -> Result<(), String>,
    {
        while self.report.first_violation.is_none() {
            if !self.threads.iter().any(ThreadState::is_running) {
                break;
            }

            let current = self.env.scheduler().current_thread();
            let ThreadState::Running { step } = self.threads[current] else {
                self.switch_away();
                continue;
            };

            match self.env.next_fault() {
                Some(Fault::Crash) => {
                    self.threads[current] = ThreadState::Crashed;
                    self.report.crashed_threads_count += 1;
                    continue;
                }
                Some(Fault::Stall) => {
                    self.report.stalls_count += 1;
                    self.switch_away();
                    continue;
                }
                Some(Fault::Delay { .. }) | None => {}
            }
            self.env.advance(OPERATION_COST_NS);

            // One operation occupies two logical ticks: invocation, response.
            let invoked_at = self.report.operations_count * 2 + 1;
            let thread_id = current as u64;

            if self.env.rng().gen_bool(self.config.push_probability) {
                let value = self.value_for(current, step);
                push(current, value);
                self.model.push(value);
                self.history
                    .record_push(thread_id, value, invoked_at, invoked_at + 1);
                self.report.pushes_count += 1;
            } else {
                let actual = pop(current);
                let expected = self.model.pop();
                self.history
                    .record_pop(thread_id, actual, invoked_at, invoked_at + 1);
                match actual {
                    Some(_) => self.report.pops_count += 1,
                    None => self.report.empty_pops_count += 1,
                }
                if actual != expected {
                    let violation = format!(
                        "Thread {} step {}: pop returned {:?}, reference model expected {:?}",
                        current, step, actual, expected
                    );
                    self.report.counterexample = Some(self.recent_counterexample(&violation));
                    self.report.first_violation = Some(violation);
                    self.report.operations_count += 1;
                    break;
                }
            }
            self.report.operations_count += 1;

            let next = step + 1;
            self.threads[current] = if next >= self.config.operations_per_thread {
                ThreadState::Done
            } else {
                ThreadState::Running { step: next }
            };

            if self.should_check_invariants() {
                self.run_check(&mut check);
            }

            self.yield_point();
        }

        if self.report.first_violation.is_none() {
            self.run_check(&mut check);
        }

        self.report.elapsed_ns = self.env.now_ns();
        self.report.clone()
    }

    /// Environment counters for the run so far.
    #[must_use]
    pub fn stats(&self) -> DstStats {
        self.env.stats()
    }

    fn recent_counterexample(&self, violation: &str) -> Counterexample {
        let ops = &self.history.operations;
        let tail = StackHistory {
            operations: ops[ops.len().saturating_sub(COUNTEREXAMPLE_OPERATIONS_MAX)..].to_vec(),
        };
        Counterexample::from_history(&tail, Some(self.env.seed()))
            .with_description(violation.to_string())
    }

    fn switch_away(&mut self) {
        let threads = &self.threads;
        if self
            .env
            .scheduler()
            .force_switch(|t| threads[t].is_running())
            .is_some()
        {
            self.report.context_switches_count += 1;
        }
    }

    fn yield_point(&mut self) {
        let threads = &self.threads;
        let decision = self.env.scheduler().decide(|t| threads[t].is_running());
        if decision != ScheduleDecision::Continue {
            self.report.context_switches_count += 1;
        }
    }

    fn should_check_invariants(&self) -> bool {
        let interval = self.config.invariant_check_interval;
        interval != 0 && self.report.operations_count % interval == 0
    }

    fn run_check<C>(&mut self, check: &mut C)
    where
        C: FnMut() -> Result<(), String>,
    {
        self.report.invariant_checks_count += 1;
        if let Err(violation) = check() {
            self.report.first_violation = Some(violation);
        }
    }
}
