//! Run configuration for DST tests.
//!
//! Knobs come from two places: `DstConfig` presets chosen by each test, and
//! the `DST_SEED` / `DST_ITERATIONS` environment variables for reproduction
//! and soak runs.

use thiserror::Error;

use crate::fault::FaultConfig;
use crate::scheduler::THREADS_COUNT_MAX;

/// Environment variable holding the seed to replay.
pub const DST_SEED_VAR: &str = "DST_SEED";

/// Environment variable overriding how many seeds a DST loop runs.
pub const DST_ITERATIONS_VAR: &str = "DST_ITERATIONS";

/// Malformed DST environment values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DstError {
    /// The value is not a decimal `u64`.
    #[error("{var} must be a valid u64, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    /// Zero is reserved: seeds and iteration counts must be positive.
    #[error("{var} must be non-zero")]
    Zero { var: &'static str },
}

/// Parse a positive `u64` from the raw value of `var`.
pub fn parse_positive(var: &'static str, value: &str) -> Result<u64, DstError> {
    let parsed: u64 = value
        .trim()
        .parse()
        .map_err(|_| DstError::InvalidNumber {
            var,
            value: value.to_string(),
        })?;

    if parsed == 0 {
        return Err(DstError::Zero { var });
    }
    Ok(parsed)
}

fn read_positive(var: &'static str) -> Result<Option<u64>, DstError> {
    match std::env::var(var) {
        Ok(value) => parse_positive(var, &value).map(Some),
        Err(_) => Ok(None),
    }
}

/// Seed from `DST_SEED`, or `None` when the variable is unset.
pub fn try_seed_from_env() -> Result<Option<u64>, DstError> {
    read_positive(DST_SEED_VAR)
}

/// Iteration count from `DST_ITERATIONS`, or `default` when unset.
pub fn iterations_from_env(default: u64) -> Result<u64, DstError> {
    debug_assert!(default > 0, "Default iterations must be positive");
    Ok(read_positive(DST_ITERATIONS_VAR)?.unwrap_or(default))
}

/// Configuration for a simulated stack workload.
#[derive(Debug, Clone, PartialEq)]
pub struct DstConfig {
    /// Number of simulated threads
    pub threads_count: usize,
    /// Operations each simulated thread issues
    pub operations_per_thread: u64,
    /// Probability that an operation is a push rather than a pop
    pub push_probability: f64,
    /// Probability of a context switch after each operation
    pub yield_probability: f64,
    /// Fault injection configuration
    pub fault_config: FaultConfig,
    /// Check invariants after every N operations (0 = only at the end)
    pub invariant_check_interval: u64,
}

impl Default for DstConfig {
    fn default() -> Self {
        Self {
            threads_count: 4,
            operations_per_thread: 100,
            push_probability: 0.5,
            yield_probability: 0.2,
            fault_config: FaultConfig::default(),
            invariant_check_interval: 10,
        }
    }
}

impl DstConfig {
    /// Small run without faults.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            threads_count: 2,
            operations_per_thread: 50,
            push_probability: 0.5,
            yield_probability: 0.1,
            fault_config: FaultConfig::none(),
            invariant_check_interval: 10,
        }
    }

    /// Many threads, aggressive faults.
    #[must_use]
    pub fn stress() -> Self {
        Self {
            threads_count: 8,
            operations_per_thread: 1000,
            push_probability: 0.6,
            yield_probability: 0.3,
            fault_config: FaultConfig::aggressive(),
            invariant_check_interval: 100,
        }
    }

    /// Check the knobs are usable before a run.
    pub fn validate(&self) {
        debug_assert!(self.threads_count > 0, "Must have at least one thread");
        debug_assert!(
            self.threads_count <= THREADS_COUNT_MAX,
            "Too many threads for DST: {}",
            self.threads_count
        );
        debug_assert!(
            (0.0..=1.0).contains(&self.push_probability),
            "Push probability must be in [0.0, 1.0]"
        );
        debug_assert!(
            (0.0..=1.0).contains(&self.yield_probability),
            "Yield probability must be in [0.0, 1.0]"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positive() {
        assert_eq!(parse_positive(DST_SEED_VAR, "12345"), Ok(12345));
        assert_eq!(parse_positive(DST_SEED_VAR, " 7\n"), Ok(7));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_positive(DST_SEED_VAR, "abc").unwrap_err();
        assert_eq!(
            err,
            DstError::InvalidNumber {
                var: DST_SEED_VAR,
                value: "abc".to_string()
            }
        );
        assert_eq!(err.to_string(), "DST_SEED must be a valid u64, got \"abc\"");

        assert!(parse_positive(DST_ITERATIONS_VAR, "-1").is_err());
    }

    #[test]
    fn test_parse_rejects_zero() {
        let err = parse_positive(DST_ITERATIONS_VAR, "0").unwrap_err();
        assert_eq!(err, DstError::Zero { var: DST_ITERATIONS_VAR });
        assert_eq!(err.to_string(), "DST_ITERATIONS must be non-zero");
    }

    #[test]
    fn test_presets() {
        let quick = DstConfig::quick();
        assert_eq!(quick.fault_config, FaultConfig::none());
        quick.validate();

        let stress = DstConfig::stress();
        assert!(stress.threads_count > quick.threads_count);
        assert!(!stress.fault_config.is_quiet());
        stress.validate();
    }
}
