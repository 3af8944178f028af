//! Per-network consensus parameters

use crate::core::{Difficulty, Hash};
use crate::crypto::{keccak, NetworkType};

/// Consensus parameters of one side-chain network.
///
/// Everything that differs between mainnet, testnet, and stagenet is an
/// enumerated constant here; no other module branches on the network type.
#[derive(Debug, Clone, Copy)]
pub struct NetworkParams {
    /// Which network these parameters describe
    pub network: NetworkType,
    /// PPLNS window length in side-chain blocks
    pub window_size: u64,
    /// Target spacing between side-chain blocks, seconds
    pub block_time: u64,
    /// Blocks examined by the difficulty adjustment
    pub diff_window: u64,
    /// Timestamps trimmed from each end of the adjustment window
    pub diff_cut: usize,
    /// Maximum generations between an uncle and the block crediting it
    pub uncle_depth: u64,
    /// Percent of an uncle's reward share kept by the crediting block
    pub uncle_penalty_percent: u64,
    /// Floor for the difficulty adjustment output
    pub min_difficulty: Difficulty,
    /// Id of the network's genesis side-chain block; zero accepts any
    /// height-0 block (fresh test networks)
    pub genesis_id: Hash,
    /// Blocks past the window before a block may be pruned
    pub prune_distance: u64,
}

impl NetworkParams {
    /// Parameters for a network
    pub fn for_network(network: NetworkType) -> Self {
        match network {
            NetworkType::Mainnet => Self {
                network,
                window_size: 2160,
                block_time: 10,
                diff_window: 720,
                diff_cut: 60,
                uncle_depth: 3,
                uncle_penalty_percent: 20,
                min_difficulty: Difficulty::new(100_000),
                genesis_id: keccak(b"sidepool mainnet genesis"),
                prune_distance: 100,
            },
            NetworkType::Testnet => Self {
                network,
                window_size: 2160,
                block_time: 10,
                diff_window: 720,
                diff_cut: 60,
                uncle_depth: 3,
                uncle_penalty_percent: 20,
                min_difficulty: Difficulty::new(10_000),
                genesis_id: Hash::ZERO,
                prune_distance: 100,
            },
            NetworkType::Stagenet => Self {
                network,
                window_size: 2160,
                block_time: 10,
                diff_window: 720,
                diff_cut: 60,
                uncle_depth: 3,
                uncle_penalty_percent: 20,
                min_difficulty: Difficulty::new(10_000),
                genesis_id: Hash::ZERO,
                prune_distance: 100,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_parameters() {
        let p = NetworkParams::for_network(NetworkType::Mainnet);
        assert_eq!(p.window_size, 2160);
        assert_eq!(p.diff_window, 720);
        assert_eq!(p.diff_cut, 60);
        assert!(!p.genesis_id.is_zero());
    }

    #[test]
    fn test_test_networks_accept_any_genesis() {
        for n in [NetworkType::Testnet, NetworkType::Stagenet] {
            assert!(NetworkParams::for_network(n).genesis_id.is_zero());
        }
    }
}
