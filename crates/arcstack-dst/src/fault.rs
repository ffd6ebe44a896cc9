//! Scheduling faults for simulated threads.
//!
//! A stack has no I/O to fail, so the faults that matter are the ones
//! that change who runs when: a thread losing its turn, time jumping
//! forward under a thread, or a thread stopping for good partway through
//! its workload.

use crate::random::DeterministicRng;

/// A fault hitting the simulated thread about to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The thread loses this turn.
    Stall,
    /// Simulated time jumps forward before the thread's next operation.
    Delay { ns: u64 },
    /// The thread issues no further operations.
    Crash,
}

/// Probabilities of each fault, drawn once per scheduled turn.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultConfig {
    pub stall_probability: f64,
    pub delay_probability: f64,
    /// Upper bound of an injected delay
    pub delay_ns_max: u64,
    pub crash_probability: f64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            stall_probability: 0.01,
            delay_probability: 0.05,
            delay_ns_max: 10_000_000,
            crash_probability: 0.001,
        }
    }
}

impl FaultConfig {
    /// No faults at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            stall_probability: 0.0,
            delay_probability: 0.0,
            delay_ns_max: 0,
            crash_probability: 0.0,
        }
    }

    /// Frequent stalls and delays, occasional crashes.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            stall_probability: 0.1,
            delay_probability: 0.2,
            delay_ns_max: 100_000_000,
            crash_probability: 0.01,
        }
    }

    /// Time jumps only; every thread runs its whole workload.
    #[must_use]
    pub fn delays_only() -> Self {
        Self {
            delay_probability: 0.2,
            delay_ns_max: 50_000_000,
            ..Self::none()
        }
    }

    /// Whether no fault can ever fire.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.stall_probability == 0.0
            && self.crash_probability == 0.0
            && (self.delay_probability == 0.0 || self.delay_ns_max == 0)
    }

    fn validate(&self) {
        for (name, p) in [
            ("stall", self.stall_probability),
            ("delay", self.delay_probability),
            ("crash", self.crash_probability),
        ] {
            debug_assert!((0.0..=1.0).contains(&p), "{} probability {} out of range", name, p);
        }
    }
}

/// Counts of faults fired so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub stalls_count: u64,
    pub delays_count: u64,
    pub crashes_count: u64,
}

/// Draws faults from its own RNG stream.
pub struct FaultInjector {
    rng: DeterministicRng,
    config: FaultConfig,
    stats: FaultStats,
}

impl FaultInjector {
    pub fn new(rng: DeterministicRng, config: FaultConfig) -> Self {
        config.validate();
        Self {
            rng,
            config,
            stats: FaultStats::default(),
        }
    }

    /// The fault for the next scheduled turn, if any.
    ///
    /// A crash takes precedence over a stall, and a stall over a delay.
    pub fn next_fault(&mut self) -> Option<Fault> {
        if self.config.is_quiet() {
            return None;
        }

        if self.rng.gen_bool(self.config.crash_probability) {
            self.stats.crashes_count += 1;
            return Some(Fault::Crash);
        }
        if self.rng.gen_bool(self.config.stall_probability) {
            self.stats.stalls_count += 1;
            return Some(Fault::Stall);
        }
        if self.config.delay_ns_max > 0 && self.rng.gen_bool(self.config.delay_probability) {
            self.stats.delays_count += 1;
            let ns = self.rng.gen_range(1..=self.config.delay_ns_max);
            return Some(Fault::Delay { ns });
        }
        None
    }

    #[must_use]
    pub fn stats(&self) -> FaultStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn injector(seed: u64, config: FaultConfig) -> FaultInjector {
        FaultInjector::new(DeterministicRng::new(seed), config)
    }

    #[test]
    fn test_quiet_config_never_faults() {
        let mut faults = injector(12345, FaultConfig::none());
        assert!(FaultConfig::none().is_quiet());

        assert!((0..1000).all(|_| faults.next_fault().is_none()));
        assert_eq!(faults.stats(), FaultStats::default());
    }

    #[test]
    fn test_same_seed_same_faults() {
        let mut a = injector(42, FaultConfig::aggressive());
        let mut b = injector(42, FaultConfig::aggressive());

        for _ in 0..500 {
            assert_eq!(a.next_fault(), b.next_fault());
        }
        assert_eq!(a.stats(), b.stats());
    }

    #[test]
    fn test_stall_rate() {
        let config = FaultConfig {
            stall_probability: 0.5,
            ..FaultConfig::none()
        };
        let mut faults = injector(12345, config);

        let trials = 10_000;
        let stalls = (0..trials)
            .filter(|_| faults.next_fault() == Some(Fault::Stall))
            .count();

        let ratio = stalls as f64 / trials as f64;
        assert!((0.45..=0.55).contains(&ratio), "stall ratio {}", ratio);
        assert_eq!(faults.stats().stalls_count, stalls as u64);
    }

    #[test]
    fn test_delays_only_stays_in_bounds() {
        let config = FaultConfig {
            delay_probability: 1.0,
            delay_ns_max: 1_000_000,
            ..FaultConfig::delays_only()
        };
        let mut faults = injector(7, config);

        for _ in 0..100 {
            match faults.next_fault() {
                Some(Fault::Delay { ns }) => assert!((1..=1_000_000).contains(&ns)),
                other => panic!("expected a delay, got {:?}", other),
            }
        }
        let stats = faults.stats();
        assert_eq!(stats.delays_count, 100);
        assert_eq!(stats.stalls_count + stats.crashes_count, 0);
    }

    #[test]
    fn test_crash_wins_over_stall() {
        let config = FaultConfig {
            stall_probability: 1.0,
            crash_probability: 1.0,
            ..FaultConfig::none()
        };
        let mut faults = injector(9, config);

        assert_eq!(faults.next_fault(), Some(Fault::Crash));
        assert_eq!(faults.stats().stalls_count, 0);
    }
}
