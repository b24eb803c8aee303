//! Server-Side Random Number Generation
//!
//! Xorshift128+ seeded through SplitMix64. Every outcome roll in the engine is
//! drawn here, on the server; clients never supply randomness.
//!
//! Not cryptographic. A seed is derived from fresh entropy at startup; tests
//! pin a seed (or script the rolls) to make outcomes reproducible.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Source of uniform rolls for outcome draws.
///
/// The resolver only ever needs these two shapes of randomness, so this is the
/// seam tests use to force a specific catch or loot result.
pub trait RollSource: Send {
    /// Uniform value in `[0, 1)`.
    fn next_unit(&mut self) -> f64;

    /// Uniform integer in `[min, max]`; returns `min` when `min >= max`.
    fn next_int_range(&mut self, min: u32, max: u32) -> u32;
}

/// Xorshift128+ PRNG.
///
/// # Example
///
/// ```
/// use fieldquest::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create an RNG seeded from process entropy (random UUID plus wall clock).
    pub fn from_entropy() -> Self {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        let seed = derive_seed(uuid::Uuid::new_v4().as_bytes(), nanos as u64);
        Self::new(seed)
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Simple modulo - slight bias for very large max, but acceptable
        (self.next_u64() % max as u64) as u32
    }
}

impl RollSource for DeterministicRng {
    #[inline]
    fn next_unit(&mut self) -> f64 {
        // Top 53 bits fill the f64 mantissa exactly
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    #[inline]
    fn next_int_range(&mut self, min: u32, max: u32) -> u32 {
        if min >= max {
            return min;
        }
        min + self.next_int(max - min + 1)
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a 64-bit seed from entropy bytes and a nonce.
pub fn derive_seed(entropy: &[u8], nonce: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(b"FIELDQUEST_SEED_V1");
    hasher.update(entropy);
    hasher.update(nonce.to_le_bytes());
    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(seed)
}

/// Roll source that replays a fixed script, then falls back to zero.
#[cfg(test)]
pub(crate) struct ScriptedRolls {
    units: std::collections::VecDeque<f64>,
    ints: std::collections::VecDeque<u32>,
}

#[cfg(test)]
impl ScriptedRolls {
    pub(crate) fn new(units: &[f64]) -> Self {
        Self {
            units: units.iter().copied().collect(),
            ints: std::collections::VecDeque::new(),
        }
    }

    pub(crate) fn with_ints(mut self, ints: &[u32]) -> Self {
        self.ints = ints.iter().copied().collect();
        self
    }
}

#[cfg(test)]
impl RollSource for ScriptedRolls {
    fn next_unit(&mut self) -> f64 {
        self.units.pop_front().unwrap_or(0.0)
    }

    fn next_int_range(&mut self, min: u32, max: u32) -> u32 {
        self.ints.pop_front().unwrap_or(min).clamp(min, max.max(min))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        // Same seed must produce same sequence
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(54321);

        // Very unlikely to match
        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_next_unit_range() {
        let mut rng = DeterministicRng::new(777);
        let mut sum = 0.0;
        for _ in 0..10_000 {
            let v = rng.next_unit();
            assert!((0.0..1.0).contains(&v));
            sum += v;
        }
        // Mean of U[0,1) should sit near 0.5
        let mean = sum / 10_000.0;
        assert!((mean - 0.5).abs() < 0.02, "mean {}", mean);
    }

    #[test]
    fn test_next_int_range() {
        let mut rng = DeterministicRng::new(5678);

        for _ in 0..1000 {
            let val = rng.next_int_range(1, 3);
            assert!((1..=3).contains(&val));
        }

        // Edge case: min = max
        assert_eq!(rng.next_int_range(5, 5), 5);
    }

    #[test]
    fn test_next_int_edge_cases() {
        let mut rng = DeterministicRng::new(1234);
        assert_eq!(rng.next_int(0), 0);
        assert_eq!(rng.next_int(1), 0);
    }

    #[test]
    fn test_derive_seed() {
        let seed1 = derive_seed(b"entropy", 1);
        let seed2 = derive_seed(b"entropy", 1);
        assert_eq!(seed1, seed2);
        assert_ne!(seed1, derive_seed(b"entropy", 2));
        assert_ne!(seed1, derive_seed(b"other", 1));
    }

    #[test]
    fn test_from_entropy_differs() {
        let mut a = DeterministicRng::from_entropy();
        let mut b = DeterministicRng::from_entropy();
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn test_scripted_rolls() {
        let mut rolls = ScriptedRolls::new(&[0.25, 0.75]).with_ints(&[3]);
        assert_eq!(rolls.next_unit(), 0.25);
        assert_eq!(rolls.next_unit(), 0.75);
        assert_eq!(rolls.next_unit(), 0.0);
        assert_eq!(rolls.next_int_range(1, 3), 3);
        assert_eq!(rolls.next_int_range(1, 3), 1);
    }
}
