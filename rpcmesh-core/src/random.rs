//! Random number generation provider.
//!
//! The RPC layer only draws randomness for heartbeat jitter, but it goes
//! through a provider like every other side effect.

use rand::distr::uniform::SampleUniform;
use rand::prelude::*;
use std::cell::RefCell;
use std::ops::Range;

/// Provider trait for random number generation.
pub trait RandomProvider: Clone {
    /// Generate a random value within `start..end` (upper bound exclusive).
    fn random_range<T>(&self, range: Range<T>) -> T
    where
        T: SampleUniform + PartialOrd;
}

/// Production random provider using the thread-local RNG.
#[derive(Clone, Debug, Default)]
pub struct TokioRandomProvider;

impl TokioRandomProvider {
    /// Create a new production random provider.
    pub fn new() -> Self {
        Self
    }
}

thread_local! {
    static RNG: RefCell<rand::rngs::ThreadRng> = RefCell::new(rand::rng());
}

impl RandomProvider for TokioRandomProvider {
    fn random_range<T>(&self, range: Range<T>) -> T
    where
        T: SampleUniform + PartialOrd,
    {
        RNG.with(|rng| rng.borrow_mut().random_range(range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_range_stays_in_bounds() {
        let random = TokioRandomProvider::new();
        for _ in 0..1000 {
            let value = random.random_range(0u64..5000);
            assert!(value < 5000);
        }
    }
}
