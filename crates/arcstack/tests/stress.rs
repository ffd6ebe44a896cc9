//! Multi-threaded stress tests on real OS threads.
//!
//! These complement DST: the interleavings are whatever the hardware
//! produces, so they catch what a sequential simulation cannot, at the
//! cost of reproducibility.
#![cfg(not(loom))]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use arcstack::{ConcurrentStack, TrackedStack};
use arcstack_core::{PropertyChecker, StackPropertyChecker};
use rand::Rng;

fn threads_count() -> usize {
    num_cpus::get().clamp(2, 8)
}

fn counts(values: impl IntoIterator<Item = u64>) -> HashMap<u64, usize> {
    let mut counts = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}

#[test]
fn test_concurrent_push_then_drain() {
    const PER_THREAD: u64 = 10_000;
    let threads = threads_count() as u64;
    let stack = ConcurrentStack::new();

    thread::scope(|s| {
        for t in 0..threads {
            let stack = &stack;
            s.spawn(move || {
                for i in 0..PER_THREAD {
                    stack.push(t * PER_THREAD + i);
                }
            });
        }
    });

    let drained: Vec<Vec<u64>> = thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let stack = &stack;
                s.spawn(move || std::iter::from_fn(|| stack.pop()).collect::<Vec<u64>>())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // Each drainer sees its own pops in LIFO order, so every thread's
    // values come out of one drainer in descending order.
    for popped in &drained {
        let mut last_seen: HashMap<u64, u64> = HashMap::new();
        for &value in popped {
            let producer = value / PER_THREAD;
            if let Some(&previous) = last_seen.get(&producer) {
                assert!(value < previous, "{} popped after {}", value, previous);
            }
            last_seen.insert(producer, value);
        }
    }

    let all = counts(drained.into_iter().flatten());
    assert_eq!(all.len() as u64, threads * PER_THREAD);
    assert!(all.values().all(|&n| n == 1));
    assert!(stack.is_empty());
}

#[test]
fn test_mixed_push_pop() {
    const PER_THREAD: u64 = 20_000;
    let threads = threads_count() as u64;
    let stack = ConcurrentStack::new();
    let barrier = Barrier::new(threads as usize);

    let popped: Vec<Vec<u64>> = thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let stack = &stack;
                let barrier = &barrier;
                s.spawn(move || {
                    let mut rng = rand::thread_rng();
                    let mut popped = Vec::new();
                    barrier.wait();
                    for i in 0..PER_THREAD {
                        stack.push(t * PER_THREAD + i);
                        if rng.gen_bool(0.5) {
                            popped.extend(stack.pop());
                        }
                    }
                    popped
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let remaining = std::iter::from_fn(|| stack.pop());
    let all = counts(popped.into_iter().flatten().chain(remaining));

    assert_eq!(all.len() as u64, threads * PER_THREAD, "element lost");
    assert!(all.values().all(|&n| n == 1), "element duplicated");
}

#[test]
fn test_string_churn() {
    const ROUNDS: usize = 5_000;
    let stack = ConcurrentStack::new();

    thread::scope(|s| {
        for t in 0..threads_count() {
            let stack = &stack;
            s.spawn(move || {
                for i in 0..ROUNDS {
                    stack.push(format!("{}-{}", t, i));
                    if let Some(value) = stack.pop() {
                        // A torn or freed string would fail to parse.
                        let (thread, round) = value.split_once('-').unwrap();
                        assert!(thread.parse::<usize>().is_ok(), "{}", value);
                        assert!(round.parse::<usize>().unwrap() < ROUNDS, "{}", value);
                    }
                }
            });
        }
    });

    assert!(stack.is_empty());
}

#[test]
fn test_popped_values_survive_churn() {
    const ROUNDS: u64 = 5_000;
    let threads = threads_count() as u64;
    let stack = ConcurrentStack::new();

    let kept: Vec<Vec<Vec<u64>>> = thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let stack = &stack;
                s.spawn(move || {
                    let mut kept = Vec::new();
                    for i in 0..ROUNDS {
                        stack.push(vec![t, i, t ^ i]);
                        if i % 2 == 1 {
                            kept.extend(stack.pop());
                        }
                    }
                    kept
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // Values held while other threads kept pushing and popping are intact.
    let mut seen = Vec::new();
    for value in kept.iter().flatten() {
        assert_eq!(value.len(), 3, "{:?}", value);
        assert_eq!(value[2], value[0] ^ value[1], "{:?}", value);
        assert!(value[0] < threads && value[1] < ROUNDS, "{:?}", value);
        seen.push(value[0] * ROUNDS + value[1]);
    }
    seen.extend(std::iter::from_fn(|| stack.pop()).map(|v| v[0] * ROUNDS + v[1]));

    assert_eq!(seen.len() as u64, threads * ROUNDS);
    assert!(counts(seen).values().all(|&n| n == 1), "element duplicated");
}

#[test]
fn test_every_value_dropped_once() {
    struct Counted(Arc<AtomicUsize>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    const PER_THREAD: usize = 5_000;
    let threads = threads_count();
    let drops = Arc::new(AtomicUsize::new(0));
    let stack = ConcurrentStack::new();

    thread::scope(|s| {
        for _ in 0..threads {
            let stack = &stack;
            let drops = &drops;
            s.spawn(move || {
                for i in 0..PER_THREAD {
                    stack.push(Counted(Arc::clone(drops)));
                    if i % 3 == 0 {
                        drop(stack.pop());
                    }
                }
            });
        }
    });

    drop(stack);
    assert_eq!(drops.load(Ordering::SeqCst), threads * PER_THREAD);
}

#[test]
fn test_deep_stack_drop() {
    let stack = ConcurrentStack::new();
    for i in 0..1_000_000u64 {
        stack.push(i);
    }
    assert_eq!(stack.pop(), Some(999_999));
    drop(stack);
}

#[test]
fn test_concurrent_histories_linearizable() {
    const THREADS: u64 = 3;
    const OPS_PER_THREAD: u64 = 6;

    for round in 0..200 {
        let stack = TrackedStack::new();
        let barrier = Barrier::new(THREADS as usize);

        thread::scope(|s| {
            for t in 0..THREADS {
                let stack = &stack;
                let barrier = &barrier;
                s.spawn(move || {
                    let mut rng = rand::thread_rng();
                    barrier.wait();
                    for i in 0..OPS_PER_THREAD {
                        if rng.gen_bool(0.5) {
                            stack.push(t, t * OPS_PER_THREAD + i + 1);
                        } else {
                            stack.pop(t);
                        }
                    }
                });
            }
        });

        let checker = StackPropertyChecker::new(&stack);
        if let Err(failure) = checker.verify_all() {
            panic!("round {}: {}", round, failure.format_status());
        }
    }
}
