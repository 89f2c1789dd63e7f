//! Injectable randomness
//!
//! Arbiter selection, training papers and self-check sampling draw from a
//! [`RandomSource`] so tests can pin the outcome with a seed.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Shared reference to a random source
pub type SharedRandom = Arc<dyn RandomSource>;

pub trait RandomSource: Send + Sync {
    /// Uniform index in `0..len`; `None` when `len` is zero
    fn pick(&self, len: usize) -> Option<usize>;

    /// `amount` distinct indices in `0..len`, clamped to `len`
    fn sample(&self, len: usize, amount: usize) -> Vec<usize>;
}

/// Thread-local OS-seeded generator
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick(&self, len: usize) -> Option<usize> {
        (len > 0).then(|| rand::thread_rng().gen_range(0..len))
    }

    fn sample(&self, len: usize, amount: usize) -> Vec<usize> {
        rand::seq::index::sample(&mut rand::thread_rng(), len, amount.min(len)).into_vec()
    }
}

/// Deterministic generator for tests and replays
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }
}

impl RandomSource for SeededRandom {
    fn pick(&self, len: usize) -> Option<usize> {
        (len > 0).then(|| self.with_rng(|rng| rng.gen_range(0..len)))
    }

    fn sample(&self, len: usize, amount: usize) -> Vec<usize> {
        self.with_rng(|rng| rand::seq::index::sample(rng, len, amount.min(len)).into_vec())
    }
}
