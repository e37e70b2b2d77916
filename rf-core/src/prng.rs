//! Non-cryptographic randomness for spectral dither (spec §9:
//! "exact distribution need not match the original as long as it is
//! uniform symmetric around zero").

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub struct Dither {
    rng: SmallRng,
}

impl Dither {
    pub fn new() -> Self {
        Dither { rng: SmallRng::from_entropy() }
    }

    /// Returns an integer uniformly distributed in `[-bound, bound]`.
    pub fn symmetric(&mut self, bound: i64) -> i64 {
        if bound <= 0 {
            return 0;
        }
        self.rng.gen_range(-bound..=bound)
    }

    /// Returns a uniform `f64` offset in `[-bound, bound]`, used for the
    /// WSPR-2/WSPR-15 center-frequency randomization at setup.
    pub fn symmetric_f64(&mut self, bound: f64) -> f64 {
        if bound <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-bound..=bound)
    }
}

impl Default for Dither {
    fn default() -> Self {
        Self::new()
    }
}
