//! PoW hasher seam and seed management

use crate::core::constants::{SEED_EPOCH_BLOCKS, SEED_EPOCH_LAG};
use crate::core::Hash;
use crate::crypto::keccak_parts;
use parking_lot::RwLock;

/// Height of the seed block whose hash keys the PoW dataset for `height`.
///
/// Epochs are aligned to `SEED_EPOCH_BLOCKS` with a `SEED_EPOCH_LAG` delay
/// so miners can rebuild datasets before the switch. Heights at or below
/// the lag use the genesis seed (height 0).
pub fn seed_height(height: u64) -> u64 {
    if height > SEED_EPOCH_LAG {
        (height - SEED_EPOCH_LAG - 1) & !(SEED_EPOCH_BLOCKS - 1)
    } else {
        0
    }
}

/// Interface to the PoW backend.
///
/// The RandomX library is linked outside this crate and implements this
/// trait; dataset initialization for a new seed is the backend's problem.
/// `calculate` returns `None` while the requested seed is not initialized,
/// which callers treat as a transient verification failure.
pub trait PowHasher: Send + Sync {
    /// Install the seed for the current epoch
    fn set_seed(&self, seed: Hash);

    /// Install the seed for the previous epoch.
    ///
    /// Must complete synchronously during startup, before any share or peer
    /// block can arrive.
    fn set_old_seed(&self, seed: Hash);

    /// Hash `blob` under `seed`, if that seed is initialized
    fn calculate(&self, blob: &[u8], seed: &Hash) -> Option<Hash>;
}

/// Keccak-keyed software backend.
///
/// Stands in when no RandomX backend is linked; it keeps the same
/// seed-gating behavior so the daemon's verification paths are identical.
#[derive(Default)]
pub struct KeccakPow {
    seeds: RwLock<[Option<Hash>; 2]>,
}

impl KeccakPow {
    /// Create a backend with no seeds installed
    pub fn new() -> Self {
        Self::default()
    }
}

impl PowHasher for KeccakPow {
    fn set_seed(&self, seed: Hash) {
        let mut seeds = self.seeds.write();
        if seeds[0] != Some(seed) {
            seeds[1] = seeds[0];
            seeds[0] = Some(seed);
        }
    }

    fn set_old_seed(&self, seed: Hash) {
        self.seeds.write()[1] = Some(seed);
    }

    fn calculate(&self, blob: &[u8], seed: &Hash) -> Option<Hash> {
        let seeds = self.seeds.read();
        if !seeds.iter().any(|s| s.as_ref() == Some(seed)) {
            return None;
        }
        Some(keccak_parts(&[seed.as_bytes(), blob]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_height_epochs() {
        assert_eq!(seed_height(64), 0);
        assert_eq!(seed_height(0), 0);
        // (2112 - 64 - 1) & !2047 == 2047 & !2047 == 0
        assert_eq!(seed_height(2048 + 64), 0);
        assert_eq!(seed_height(2048 + 64 + 1), 2048);
        assert_eq!(seed_height(4096 + 64 + 1), 4096);
    }

    #[test]
    fn test_seed_height_monotonic_and_aligned() {
        let mut prev = 0;
        for h in 0..10_000 {
            let s = seed_height(h);
            assert!(s >= prev, "seed_height must not decrease");
            assert_eq!(s % SEED_EPOCH_BLOCKS, 0, "seed height must be aligned");
            prev = s;
        }
    }

    #[test]
    fn test_hasher_requires_seed() {
        let hasher = KeccakPow::new();
        let seed = Hash::from_bytes([1; 32]);
        assert!(hasher.calculate(b"blob", &seed).is_none());

        hasher.set_seed(seed);
        let h = hasher.calculate(b"blob", &seed).unwrap();
        assert!(!h.is_zero());
    }

    #[test]
    fn test_hasher_keeps_old_seed() {
        let hasher = KeccakPow::new();
        let old = Hash::from_bytes([1; 32]);
        let new = Hash::from_bytes([2; 32]);

        hasher.set_seed(old);
        hasher.set_seed(new);
        assert!(hasher.calculate(b"x", &old).is_some());
        assert!(hasher.calculate(b"x", &new).is_some());

        // two epochs later the oldest seed is gone
        hasher.set_seed(Hash::from_bytes([3; 32]));
        assert!(hasher.calculate(b"x", &old).is_none());
    }

    #[test]
    fn test_set_seed_idempotent() {
        let hasher = KeccakPow::new();
        let old = Hash::from_bytes([1; 32]);
        let new = Hash::from_bytes([2; 32]);
        hasher.set_old_seed(old);
        hasher.set_seed(new);
        hasher.set_seed(new);
        assert!(hasher.calculate(b"x", &old).is_some());
    }
}
