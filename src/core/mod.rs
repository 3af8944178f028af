//! Core consensus types
//!
//! Fundamental value types shared by every subsystem: 32-byte identifiers
//! and 128-bit difficulty with the reference chain's target check.

mod difficulty;
mod hash;

pub use difficulty::Difficulty;
pub use hash::Hash;

/// Protocol-wide constants
pub mod constants {
    /// Size of a hash in bytes (Keccak-256)
    pub const HASH_SIZE: usize = 32;

    /// Size of the header nonce in bytes
    pub const NONCE_SIZE: usize = 4;

    /// Size of the extra nonce carried in the miner transaction
    pub const EXTRA_NONCE_SIZE: usize = 4;

    /// RandomX seed epoch length in main-chain blocks
    pub const SEED_EPOCH_BLOCKS: u64 = 2048;

    /// Lag between a seed block and its activation
    pub const SEED_EPOCH_LAG: u64 = 64;

    /// Main-chain headers kept by the shadow (also the median baseline)
    pub const BLOCK_HEADERS_REQUIRED: u64 = 720;

    /// Main-chain timestamps used for the median window
    pub const TIMESTAMP_WINDOW: usize = 60;
}

#[cfg(test)]
mod tests {
    use super::constants::*;

    #[test]
    fn test_constants() {
        assert_eq!(HASH_SIZE, 32);
        assert_eq!(NONCE_SIZE, 4);
        assert_eq!(EXTRA_NONCE_SIZE, 4);
        assert_eq!(SEED_EPOCH_BLOCKS & (SEED_EPOCH_BLOCKS - 1), 0);
    }
}
