//! Deterministic PRNG for failure rolls.
//!
//! Every probabilistic function in the crate takes a `&mut impl RandomSource`
//! rather than reaching for a global generator, so trigger outcomes are
//! reproducible in tests and identical across authoritative restarts.
//! [`SimRng`] uses the SplitMix64 algorithm: fast, 8 bytes of state, and
//! trivially serializable for snapshots.

/// A source of uniform draws in `[0, 1)`.
pub trait RandomSource {
    /// Next uniform draw in `[0, 1)`.
    fn next_unit(&mut self) -> f32;

    /// Returns `true` with the given probability.
    ///
    /// - probability <= 0 always returns false (no draw is consumed)
    /// - probability >= 1 always returns true (no draw is consumed)
    fn chance(&mut self, probability: f32) -> bool {
        if probability.is_nan() || probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.next_unit() < probability
    }

    /// Uniform draw in `[lo, hi)`.
    fn range(&mut self, lo: f32, hi: f32) -> f32 {
        lo + (hi - lo) * self.next_unit()
    }

    /// Uniform draw of a whole number of milliseconds in `[lo, hi]`.
    fn range_ms(&mut self, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            return lo;
        }
        let span = (hi - lo) as f64;
        lo + (span * self.next_unit() as f64).round() as u64
    }

    /// -1 or +1 with equal probability.
    fn sign(&mut self) -> i8 {
        if self.next_unit() < 0.5 { -1 } else { 1 }
    }
}

/// SplitMix64 pseudo-random number generator.
///
/// Deterministic across platforms. Each vehicle owns one, derived from the
/// engine seed and the vehicle's spawn order.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    /// Create a new RNG with the given seed.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Derive an independent stream from a base seed.
    pub fn derive(seed: u64, stream: u64) -> Self {
        let mut base = Self::new(seed ^ stream.wrapping_mul(0xD1B5_4A32_D192_ED03));
        // Burn one output so adjacent streams don't start correlated.
        base.next_u64();
        base
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Get the internal state (for hashing/serialization).
    pub fn state(&self) -> u64 {
        self.state
    }
}

impl RandomSource for SimRng {
    fn next_unit(&mut self) -> f32 {
        // Top 24 bits fill the f32 mantissa exactly, so the result is < 1.0.
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let mut a = SimRng::new(42);
        let mut b = SimRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn derived_streams_differ() {
        let mut a = SimRng::derive(7, 0);
        let mut b = SimRng::derive(7, 1);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn unit_draws_stay_in_range() {
        let mut rng = SimRng::new(3);
        for _ in 0..10_000 {
            let v = rng.next_unit();
            assert!((0.0..1.0).contains(&v), "draw out of range: {v}");
        }
    }

    #[test]
    fn chance_edges() {
        let mut rng = SimRng::new(999);
        for _ in 0..100 {
            assert!(!rng.chance(0.0));
            assert!(!rng.chance(-1.0));
            assert!(!rng.chance(f32::NAN));
            assert!(rng.chance(1.0));
            assert!(rng.chance(2.0));
        }
    }

    #[test]
    fn chance_half_roughly_balanced() {
        let mut rng = SimRng::new(12345);
        let hits = (0..10_000).filter(|_| rng.chance(0.5)).count();
        assert!((4000..=6000).contains(&hits), "expected ~5000, got {hits}");
    }

    #[test]
    fn range_ms_is_inclusive_and_ordered() {
        let mut rng = SimRng::new(5);
        for _ in 0..1000 {
            let v = rng.range_ms(150, 400);
            assert!((150..=400).contains(&v));
        }
        assert_eq!(rng.range_ms(500, 500), 500);
        assert_eq!(rng.range_ms(900, 100), 900);
    }

    #[test]
    fn serialization_round_trip() {
        let mut rng = SimRng::new(42);
        for _ in 0..50 {
            rng.next_u64();
        }

        let json = serde_json::to_string(&rng).unwrap();
        let restored: SimRng = serde_json::from_str(&json).unwrap();
        assert_eq!(rng, restored);

        let mut rng2 = restored;
        for _ in 0..10 {
            assert_eq!(rng.next_u64(), rng2.next_u64());
        }
    }
}
