//! DST integration tests for the concurrent stack.
//!
//! Runs `TrackedStack` through the DST harness and checks the stack
//! invariants from arcstack-core at every checkpoint.
//!
//! The harness interleaves whole operations: each `ConcurrentStack` call
//! runs to completion on one OS thread before the scheduler switches, so no
//! CAS ever fails here. Contention is covered by `tests/stress.rs` and the
//! loom tests, not by DST.
//!
//! Reproduce a failure with `DST_SEED=<seed> cargo test -p arcstack --test dst_integration`.
#![cfg(not(loom))]

use arcstack::TrackedStack;
use arcstack_core::{PropertyChecker, StackProperties, StackPropertyChecker};
use arcstack_dst::{
    get_or_generate_seed, iterations_from_env, DeterministicRng, DstConfig, DstHarness,
    FaultConfig, HarnessReport,
};

fn run_tracked(seed: u64, config: DstConfig) -> (HarnessReport, TrackedStack) {
    let stack = TrackedStack::new();
    let mut harness = DstHarness::new(seed, config);

    let report = harness.run(
        |thread, value| stack.push(thread as u64, value),
        |thread| stack.pop(thread as u64),
        || {
            StackPropertyChecker::new(&stack)
                .with_seed(seed)
                .verify_all()
                .map_err(|failure| failure.format_status())
        },
    );
    println!("{}", harness.stats());
    (report, stack)
}

fn assert_passed(report: &HarnessReport, stack: &TrackedStack) {
    assert!(report.passed(), "{}", report);

    let checker = StackPropertyChecker::new(stack).with_seed(report.seed);
    let summary = checker.summary();
    assert!(
        checker.all_hold(),
        "Final check failed at DST_SEED={}\n{}",
        report.seed,
        summary.format_report()
    );
}

#[test]
fn test_dst_quick() {
    let seed = get_or_generate_seed();
    let (report, stack) = run_tracked(seed, DstConfig::quick());

    assert_passed(&report, &stack);
    assert_eq!(report.operations_count, 100);
    println!("{}", report);
}

#[test]
fn test_dst_default_faults() {
    let seed = get_or_generate_seed();
    let (report, stack) = run_tracked(seed, DstConfig::default());

    assert_passed(&report, &stack);
    assert!(report.invariant_checks_count > 0);
    println!("{}", report);
}

#[test]
fn test_dst_pop_heavy() {
    let seed = get_or_generate_seed();
    let config = DstConfig {
        push_probability: 0.2,
        ..DstConfig::quick()
    };
    let (report, stack) = run_tracked(seed, config);

    assert_passed(&report, &stack);
    assert!(report.empty_pops_count > 0, "{}", report);
}

#[test]
fn test_dst_many_seeds() {
    let iterations = iterations_from_env(20).expect("DST_ITERATIONS");
    let mut seeds = DeterministicRng::new(get_or_generate_seed());

    for _ in 0..iterations {
        let seed = seeds.gen::<u64>().max(1);
        let config = DstConfig {
            threads_count: 3,
            operations_per_thread: 40,
            fault_config: FaultConfig::aggressive(),
            ..DstConfig::default()
        };
        let (report, stack) = run_tracked(seed, config);
        assert_passed(&report, &stack);
    }
}

#[test]
fn test_dst_same_seed_same_history() {
    let seed = get_or_generate_seed();
    let config = DstConfig {
        fault_config: FaultConfig::delays_only(),
        ..DstConfig::default()
    };

    let (first, first_stack) = run_tracked(seed, config.clone());
    let (second, second_stack) = run_tracked(seed, config);

    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(
        first_stack.history().operations,
        second_stack.history().operations
    );
}
