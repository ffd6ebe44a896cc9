//! The simulated world one DST run executes in.
//!
//! A single seed is split into independent streams for the workload, the
//! fault injector and the scheduler, so changing how often one of them
//! draws never shifts the choices of the others.

use std::fmt;

use crate::clock::SimClock;
use crate::fault::{Fault, FaultConfig, FaultInjector};
use crate::random::DeterministicRng;
use crate::scheduler::Scheduler;

/// Clock, randomness, faults and scheduling for one run.
///
/// ```rust
/// use arcstack_dst::{DstEnv, FaultConfig};
///
/// let mut env = DstEnv::new(12345, 4, 0.2, FaultConfig::default());
///
/// let push: bool = env.rng().gen_bool(0.5);
/// let fault = env.next_fault();
/// let running = env.scheduler().current_thread();
/// assert!(running < 4);
/// ```
pub struct DstEnv {
    seed: u64,
    clock: SimClock,
    rng: DeterministicRng,
    fault: FaultInjector,
    scheduler: Scheduler,
}

impl DstEnv {
    /// Seed zero is reserved so an unset seed is never mistaken for one.
    pub fn new(
        seed: u64,
        threads_count: usize,
        yield_probability: f64,
        fault_config: FaultConfig,
    ) -> Self {
        debug_assert!(seed != 0, "DST seed must be non-zero");

        // Stream order is part of the replay contract.
        let mut root = DeterministicRng::new(seed);
        let rng = root.fork();
        let fault = FaultInjector::new(root.fork(), fault_config);
        let scheduler = Scheduler::new(root.fork(), threads_count, yield_probability);

        Self {
            seed,
            clock: SimClock::new(),
            rng,
            fault,
            scheduler,
        }
    }

    /// One simulated thread, never preempted.
    pub fn single_threaded(seed: u64, fault_config: FaultConfig) -> Self {
        Self::new(seed, 1, 0.0, fault_config)
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    pub fn advance(&mut self, delta_ns: u64) {
        self.clock.advance_ns(delta_ns);
    }

    /// Workload randomness.
    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    pub fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Draw the fault for the next turn. Delays are applied to the clock
    /// here and still reported.
    pub fn next_fault(&mut self) -> Option<Fault> {
        let fault = self.fault.next_fault();
        if let Some(Fault::Delay { ns }) = fault {
            self.clock.advance_ns(ns);
        }
        fault
    }

    /// `DST_SEED=<seed>`, ready to paste into a shell.
    #[must_use]
    pub fn format_seed(&self) -> String {
        format!("DST_SEED={}", self.seed)
    }

    #[must_use]
    pub fn stats(&self) -> DstStats {
        let faults = self.fault.stats();
        DstStats {
            seed: self.seed,
            elapsed_ns: self.clock.now_ns(),
            rng_calls: self.rng.calls_count(),
            stalls_injected: faults.stalls_count,
            delays_injected: faults.delays_count,
            crashes_injected: faults.crashes_count,
            scheduler_decisions: self.scheduler.decisions_count(),
        }
    }
}

/// Summary of a run's environment, printed with every DST result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DstStats {
    pub seed: u64,
    pub elapsed_ns: u64,
    /// Workload draws only; fault and scheduler streams are separate
    pub rng_calls: u64,
    pub stalls_injected: u64,
    pub delays_injected: u64,
    pub crashes_injected: u64,
    pub scheduler_decisions: u64,
}

impl fmt::Display for DstStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DST_SEED={} elapsed={}us rng_calls={} stalls={} delays={} crashes={} decisions={}",
            self.seed,
            self.elapsed_ns / 1_000,
            self.rng_calls,
            self.stalls_injected,
            self.delays_injected,
            self.crashes_injected,
            self.scheduler_decisions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ScheduleDecision;

    #[test]
    fn test_same_seed_same_world() {
        let mut a = DstEnv::new(42, 3, 0.5, FaultConfig::aggressive());
        let mut b = DstEnv::new(42, 3, 0.5, FaultConfig::aggressive());

        for _ in 0..100 {
            assert_eq!(a.rng().gen::<u64>(), b.rng().gen::<u64>());
            assert_eq!(a.next_fault(), b.next_fault());
            assert_eq!(a.scheduler().decide(|_| true), b.scheduler().decide(|_| true));
        }
        assert_eq!(a.stats(), b.stats());
    }

    #[test]
    fn test_streams_are_independent() {
        // Extra fault draws must not change the workload stream.
        let mut quiet = DstEnv::new(42, 2, 0.5, FaultConfig::none());
        let mut noisy = DstEnv::new(42, 2, 0.5, FaultConfig::aggressive());

        for _ in 0..50 {
            noisy.next_fault();
            assert_eq!(quiet.rng().gen::<u64>(), noisy.rng().gen::<u64>());
        }
    }

    #[test]
    fn test_different_seeds() {
        let mut a = DstEnv::single_threaded(42, FaultConfig::none());
        let mut b = DstEnv::single_threaded(43, FaultConfig::none());

        let left: Vec<u64> = (0..8).map(|_| a.rng().gen()).collect();
        let right: Vec<u64> = (0..8).map(|_| b.rng().gen()).collect();
        assert_ne!(left, right);
    }

    #[test]
    fn test_single_threaded_never_switches() {
        let mut env = DstEnv::single_threaded(7, FaultConfig::none());
        for _ in 0..50 {
            assert_eq!(env.scheduler().decide(|_| true), ScheduleDecision::Continue);
        }
        assert_eq!(env.scheduler().threads_count(), 1);
    }

    #[test]
    fn test_delay_moves_clock() {
        let config = FaultConfig {
            delay_probability: 1.0,
            delay_ns_max: 500,
            ..FaultConfig::none()
        };
        let mut env = DstEnv::single_threaded(11, config);

        let Some(Fault::Delay { ns }) = env.next_fault() else {
            panic!("expected a delay");
        };
        assert_eq!(env.now_ns(), ns);

        env.advance(1_000);
        assert_eq!(env.now_ns(), ns + 1_000);
    }

    #[test]
    fn test_stats_and_seed_format() {
        let mut env = DstEnv::single_threaded(12345, FaultConfig::none());
        let _: u64 = env.rng().gen();
        let _: u64 = env.rng().gen();
        env.advance(100_000);

        let stats = env.stats();
        assert_eq!(stats.rng_calls, 2);
        assert_eq!(stats.elapsed_ns, 100_000);
        assert!(stats.to_string().starts_with("DST_SEED=12345 elapsed=100us"));
        assert_eq!(env.format_seed(), "DST_SEED=12345");
    }
}
