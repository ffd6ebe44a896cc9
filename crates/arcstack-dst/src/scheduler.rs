//! Picks which simulated thread issues the next stack operation.
//!
//! Only runnable threads are ever chosen. The harness passes a predicate
//! rather than a list so finished and crashed threads drop out without the
//! scheduler tracking their state.

use crate::random::DeterministicRng;

/// Most simulated threads a run may have.
pub const THREADS_COUNT_MAX: usize = 64;

/// Outcome of a yield point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    Continue,
    SwitchTo(usize),
}

/// Seeded scheduler. Every switch picks uniformly among the other runnable
/// threads.
pub struct Scheduler {
    rng: DeterministicRng,
    threads_count: usize,
    current: usize,
    yield_probability: f64,
    decisions_count: u64,
    switches_count: u64,
}

impl Scheduler {
    pub fn new(rng: DeterministicRng, threads_count: usize, yield_probability: f64) -> Self {
        debug_assert!(
            (1..=THREADS_COUNT_MAX).contains(&threads_count),
            "thread count {} out of range",
            threads_count
        );
        debug_assert!(
            (0.0..=1.0).contains(&yield_probability),
            "yield probability {} out of range",
            yield_probability
        );

        Self {
            rng,
            threads_count,
            current: 0,
            yield_probability,
            decisions_count: 0,
            switches_count: 0,
        }
    }

    #[must_use]
    pub fn current_thread(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn threads_count(&self) -> usize {
        self.threads_count
    }

    /// Yield point after an operation: maybe preempt the current thread.
    pub fn decide(&mut self, runnable: impl Fn(usize) -> bool) -> ScheduleDecision {
        self.decisions_count += 1;

        if self.threads_count == 1 || !self.rng.gen_bool(self.yield_probability) {
            return ScheduleDecision::Continue;
        }
        match self.switch(runnable) {
            Some(next) => ScheduleDecision::SwitchTo(next),
            None => ScheduleDecision::Continue,
        }
    }

    /// Move off the current thread unconditionally.
    ///
    /// Returns `None`, and stays put, when no other thread is runnable.
    pub fn force_switch(&mut self, runnable: impl Fn(usize) -> bool) -> Option<usize> {
        self.decisions_count += 1;
        self.switch(runnable)
    }

    fn switch(&mut self, runnable: impl Fn(usize) -> bool) -> Option<usize> {
        let candidates: Vec<usize> = (0..self.threads_count)
            .filter(|&t| t != self.current && runnable(t))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let next = candidates[self.rng.gen_range(0..candidates.len())];
        self.current = next;
        self.switches_count += 1;
        Some(next)
    }

    #[must_use]
    pub fn decisions_count(&self) -> u64 {
        self.decisions_count
    }

    #[must_use]
    pub fn switches_count(&self) -> u64 {
        self.switches_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all(_: usize) -> bool {
        true
    }

    #[test]
    fn test_single_thread_never_switches() {
        let mut sched = Scheduler::new(DeterministicRng::new(12345), 1, 1.0);

        assert!((0..100).all(|_| sched.decide(all) == ScheduleDecision::Continue));
        assert_eq!(sched.force_switch(all), None);
        assert_eq!(sched.switches_count(), 0);
        assert_eq!(sched.decisions_count(), 101);
    }

    #[test]
    fn test_same_seed_same_interleaving() {
        let mut a = Scheduler::new(DeterministicRng::new(42), 4, 0.5);
        let mut b = Scheduler::new(DeterministicRng::new(42), 4, 0.5);

        for _ in 0..200 {
            assert_eq!(a.decide(all), b.decide(all));
        }
    }

    #[test]
    fn test_yield_rate() {
        let mut sched = Scheduler::new(DeterministicRng::new(12345), 4, 0.5);

        let trials = 1000;
        let switches = (0..trials)
            .filter(|_| sched.decide(all) != ScheduleDecision::Continue)
            .count();

        let ratio = switches as f64 / trials as f64;
        assert!((0.4..=0.6).contains(&ratio), "switch ratio {}", ratio);
        assert_eq!(sched.switches_count(), switches as u64);
    }

    #[test]
    fn test_only_runnable_threads_chosen() {
        let mut sched = Scheduler::new(DeterministicRng::new(3), 5, 1.0);
        let runnable = |t: usize| t % 2 == 0;

        for _ in 0..100 {
            let before = sched.current_thread();
            let after = sched.force_switch(runnable).unwrap();
            assert_ne!(before, after);
            assert!(runnable(after), "switched to {}", after);
        }
    }

    #[test]
    fn test_no_other_runnable_thread() {
        let mut sched = Scheduler::new(DeterministicRng::new(3), 3, 1.0);

        assert_eq!(sched.force_switch(|t| t == 0), None);
        assert_eq!(sched.decide(|t| t == 0), ScheduleDecision::Continue);
        assert_eq!(sched.current_thread(), 0);
    }
}
