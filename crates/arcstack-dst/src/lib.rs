//! # arcstack-dst
//!
//! Deterministic Simulation Testing for the concurrent stack.
//!
//! Inspired by FoundationDB and TigerBeetle: time, randomness, scheduling
//! and faults all flow from one seed, so any failing run can be replayed.
//!
//! ## Usage
//!
//! ```rust
//! use arcstack_dst::{DstConfig, DstHarness};
//!
//! let model = std::cell::RefCell::new(Vec::new());
//!
//! let mut harness = DstHarness::new(12345, DstConfig::quick());
//! let report = harness.run(
//!     |_thread, value| model.borrow_mut().push(value),
//!     |_thread| model.borrow_mut().pop(),
//!     || Ok(()),
//! );
//! assert!(report.passed(), "{}", report);
//! ```
//!
//! ## Reproducibility
//!
//! To reproduce a failing test:
//! ```bash
//! DST_SEED=12345 cargo test
//! ```

pub mod clock;
pub mod config;
pub mod env;
pub mod fault;
pub mod harness;
pub mod random;
pub mod scheduler;

pub use clock::SimClock;
pub use config::{iterations_from_env, try_seed_from_env, DstConfig, DstError};
pub use env::{DstEnv, DstStats};
pub use fault::{Fault, FaultConfig, FaultInjector, FaultStats};
pub use harness::{DstHarness, HarnessReport};
pub use random::DeterministicRng;
pub use scheduler::{ScheduleDecision, Scheduler};

/// Get DST seed from environment or generate random one.
///
/// Prints the seed for reproduction. Use `DST_SEED=<seed>` to reproduce.
///
/// # Panics
///
/// Panics if `DST_SEED` is set but is not a positive `u64`.
#[must_use]
pub fn get_or_generate_seed() -> u64 {
    match try_seed_from_env() {
        Ok(Some(seed)) => {
            println!("DST_SEED={} (from environment)", seed);
            seed
        }
        Ok(None) => {
            // Zero is reserved, see `DstEnv::new`.
            let seed = rand::random::<u64>().max(1);
            println!("DST_SEED={} (randomly generated)", seed);
            seed
        }
        Err(e) => panic!("{}", e),
    }
}
