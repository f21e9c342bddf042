//! Deterministic randomness for reproducible tests, including the
//! randomized-post traversal order's seed (Section 4.2).

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// A fixed-seed RNG wrapper so a test failure is reproducible from its seed
/// alone.
pub struct TestRng {
    rng: StdRng,
}

impl TestRng {
    /// Builds an RNG from an explicit seed.
    pub fn new(seed: u64) -> Self {
        let mut seed_bytes = [0u8; 32];
        seed_bytes[..8].copy_from_slice(&seed.to_le_bytes());
        Self {
            rng: StdRng::from_seed(seed_bytes),
        }
    }

    /// An RNG seeded with this crate's canonical default test seed.
    pub fn with_default_seed() -> Self {
        Self::new(12345)
    }

    /// Fills `dest` with random bytes.
    pub fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest);
    }

    /// The next 64-bit value.
    pub fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }
}

impl Default for TestRng {
    fn default() -> Self {
        Self::with_default_seed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_produces_same_sequence() {
        let mut a = TestRng::new(7);
        let mut b = TestRng::new(7);
        assert_eq!(a.next_u64(), b.next_u64());
    }
}
