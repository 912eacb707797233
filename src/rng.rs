//! Deterministic random source for training.
//!
//! One seeded generator drives factor initialization and the row/column
//! permutations; a second stream, split off with [`FactorRng::split`], drives
//! the scheduler's priority jitter. Splitting keeps the two uses reproducible
//! without coupling their consumption order.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// Seedable uniform source used throughout a training run.
///
/// Produces the same sequence for the same seed on any platform. Not
/// cryptographic.
#[derive(Debug, Clone)]
pub struct FactorRng {
    inner: Xoshiro256PlusPlus,
}

impl FactorRng {
    /// Create a generator from a 64-bit seed.
    pub fn seed_from_u64(seed: u64) -> Self {
        Self {
            inner: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    /// Next uniform `f32` in `[0, 1)`.
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        self.inner.gen::<f32>()
    }

    /// Split off an independent stream.
    ///
    /// Uses Xoshiro's long-jump, which advances the state by 2^192 steps, so
    /// the two streams never overlap in practice.
    pub fn split(&self) -> Self {
        let mut stream = self.inner.clone();
        stream.long_jump();
        Self { inner: stream }
    }

    /// Uniform random permutation of `0..len` (Fisher-Yates).
    pub fn permutation(&mut self, len: usize) -> Vec<u32> {
        let mut map: Vec<u32> = (0..len as u32).collect();
        for i in (1..len).rev() {
            let j = self.inner.gen_range(0..=i);
            map.swap(i, j);
        }
        map
    }
}

/// Invert a permutation: `inv[map[i]] == i`.
pub fn invert_permutation(map: &[u32]) -> Vec<u32> {
    let mut inv = vec![0u32; map.len()];
    for (i, &m) in map.iter().enumerate() {
        inv[m as usize] = i as u32;
    }
    inv
}
