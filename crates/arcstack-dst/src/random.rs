//! Seeded randomness for simulated stack workloads.
//!
//! Every random choice in a DST run (which thread runs, push or pop, which
//! fault fires) is drawn from one `DeterministicRng`, so a run is a pure
//! function of its seed.

use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::distributions::{Distribution, Standard};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

/// Draws beyond this point almost certainly mean a workload that never ends.
const DRAWS_COUNT_MAX: u64 = 1 << 32;

/// Xoshiro256** stream that remembers its seed and counts its draws.
///
/// ```rust
/// use arcstack_dst::DeterministicRng;
///
/// let mut rng = DeterministicRng::new(12345);
/// let a: u64 = rng.gen();
///
/// let mut replay = DeterministicRng::new(12345);
/// assert_eq!(replay.gen::<u64>(), a);
/// ```
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    seed: u64,
    inner: Xoshiro256StarStar,
    draws: u64,
}

impl DeterministicRng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: Xoshiro256StarStar::seed_from_u64(seed),
            draws: 0,
        }
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draws made since creation.
    #[must_use]
    pub fn calls_count(&self) -> u64 {
        self.draws
    }

    fn draw(&mut self) -> &mut Xoshiro256StarStar {
        self.draws += 1;
        debug_assert!(self.draws < DRAWS_COUNT_MAX, "runaway RNG use, seed {}", self.seed);
        &mut self.inner
    }

    pub fn gen<T>(&mut self) -> T
    where
        Standard: Distribution<T>,
    {
        self.draw().gen()
    }

    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.draw().gen_range(range)
    }

    /// `true` with the given probability.
    pub fn gen_bool(&mut self, probability: f64) -> bool {
        debug_assert!(
            (0.0..=1.0).contains(&probability),
            "probability {} out of range",
            probability
        );
        self.draw().gen_bool(probability)
    }

    /// Split off an independent stream, seeded from this one.
    #[must_use]
    pub fn fork(&mut self) -> Self {
        let seed = self.gen::<u64>();
        Self::new(seed)
    }
}
