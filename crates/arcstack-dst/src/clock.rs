//! Simulated time.
//!
//! The clock never reads the wall clock. It moves when the harness charges
//! an operation's cost or when the fault injector delays a thread, so the
//! elapsed time of a run is a function of its seed.

/// Monotonic simulated clock, in nanoseconds since the start of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimClock {
    now_ns: u64,
}

impl SimClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    /// Move time forward by `delta_ns`, returning the new time.
    pub fn advance_ns(&mut self, delta_ns: u64) -> u64 {
        debug_assert!(delta_ns > 0, "time must move forward");
        self.now_ns = self
            .now_ns
            .checked_add(delta_ns)
            .unwrap_or_else(|| panic!("simulated time overflow at {}ns", self.now_ns));
        self.now_ns
    }
}
