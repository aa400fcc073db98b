//! Seeded RNG used by tests that need reproducible "random" values.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct DeterministicRng {
    rng: StdRng,
}

impl DeterministicRng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn random_u64(&mut self) -> u64 {
        self.rng.random()
    }

    pub fn random_string(&mut self, len: usize) -> String {
        const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        (0..len)
            .map(|_| CHARS[self.rng.random_range(0..CHARS.len())] as char)
            .collect()
    }
}
