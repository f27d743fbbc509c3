//! Random think and eat periods.

use crate::config::Timing;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::time::Duration;

/// Draws the think and eat periods of one philosopher.
pub struct Pacer<R: Rng + ?Sized> {
    pub rng: Box<R>,
    pub think_ms: (u64, u64),
    pub eat_ms: (u64, u64),
}

impl Pacer<SmallRng> {
    pub fn new(timing: &Timing, rank: usize) -> Self {
        let rng = match timing.seed {
            Some(seed) => {
                SmallRng::seed_from_u64(seed ^ (rank as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
            }
            None => SmallRng::from_rng(&mut rand::rng()),
        };

        Self {
            rng: Box::new(rng),
            think_ms: timing.think_ms,
            eat_ms: timing.eat_ms,
        }
    }
}

impl<R: Rng + ?Sized> Pacer<R> {
    pub fn think_time(&mut self) -> Duration {
        let (min, max) = self.think_ms;
        Duration::from_millis(self.rng.random_range(min..=max))
    }

    pub fn eat_time(&mut self) -> Duration {
        let (min, max) = self.eat_ms;
        Duration::from_millis(self.rng.random_range(min..=max))
    }
}
