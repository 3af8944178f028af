//! JSON status files for external dashboards
//!
//! When an api path is configured the daemon keeps a small set of JSON
//! files up to date with atomic replacement (write to a temp name, then
//! rename). Field names and their order are compatibility-critical for
//! third-party dashboards, so they are fixed by typed builders here and
//! nowhere else.

use crate::core::{Difficulty, Hash};
use crate::error::Result;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `network/stats`
#[derive(Debug, Serialize)]
pub struct NetworkStats {
    /// Main-chain difficulty at the tip
    pub difficulty: Difficulty,
    /// Main-chain tip id
    pub hash: Hash,
    /// Main-chain tip height
    pub height: u64,
    /// Tip coinbase reward
    pub reward: u64,
    /// Tip timestamp
    pub timestamp: u64,
}

/// `pool/stats`
#[derive(Debug, Serialize)]
pub struct PoolStats {
    /// Fixed payout scheme list
    pub pool_list: Vec<&'static str>,
    /// The statistics body
    pub pool_statistics: PoolStatistics,
}

/// Body of `pool/stats`
#[derive(Debug, Serialize)]
pub struct PoolStatistics {
    /// Pool hashrate estimate
    #[serde(rename = "hashRate")]
    pub hash_rate: u64,
    /// Miners in the PPLNS window
    pub miners: u64,
    /// Cumulative side-chain hashes
    #[serde(rename = "totalHashes")]
    pub total_hashes: Difficulty,
    /// Unix time of the last found main-chain block
    #[serde(rename = "lastBlockFoundTime")]
    pub last_block_found_time: u64,
    /// Height of the last found main-chain block
    #[serde(rename = "lastBlockFound")]
    pub last_block_found: u64,
    /// Main-chain blocks found over the pool's lifetime
    #[serde(rename = "totalBlocksFound")]
    pub total_blocks_found: u64,
}

/// One record in `pool/blocks`
#[derive(Debug, Serialize)]
pub struct FoundBlockRecord {
    /// Main-chain height
    pub height: u64,
    /// Main-chain block id
    pub hash: Hash,
    /// Main-chain difficulty when found
    pub difficulty: Difficulty,
    /// Cumulative side-chain hashes at that moment
    #[serde(rename = "totalHashes")]
    pub total_hashes: Difficulty,
    /// Unix time found
    pub ts: u64,
}

/// `stats_mod`, the legacy dashboard shape
#[derive(Debug, Serialize)]
pub struct StatsMod {
    #[allow(missing_docs)]
    pub config: StatsModConfig,
    #[allow(missing_docs)]
    pub network: StatsModNetwork,
    #[allow(missing_docs)]
    pub pool: StatsModPool,
}

#[allow(missing_docs)]
#[derive(Debug, Serialize)]
pub struct StatsModConfig {
    pub ports: Vec<StatsModPort>,
    pub fee: u64,
    #[serde(rename = "minPaymentThreshold")]
    pub min_payment_threshold: u64,
}

#[allow(missing_docs)]
#[derive(Debug, Serialize)]
pub struct StatsModPort {
    pub port: u16,
    pub tls: bool,
}

#[allow(missing_docs)]
#[derive(Debug, Serialize)]
pub struct StatsModNetwork {
    pub height: u64,
}

#[allow(missing_docs)]
#[derive(Debug, Serialize)]
pub struct StatsModPool {
    pub stats: StatsModPoolStats,
    /// Truncated hash and height of the last found block
    pub blocks: Vec<String>,
    pub miners: u64,
    pub hashrate: u64,
    #[serde(rename = "roundHashes")]
    pub round_hashes: u64,
}

#[allow(missing_docs)]
#[derive(Debug, Serialize)]
pub struct StatsModPoolStats {
    #[serde(rename = "lastBlockFound")]
    pub last_block_found: String,
}

/// Writer for the status files
pub struct StatusApi {
    root: PathBuf,
}

impl StatusApi {
    /// Create the writer and its directory layout
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("network"))?;
        fs::create_dir_all(root.join("pool"))?;
        Ok(Self { root })
    }

    fn write(&self, rel: &str, value: &impl Serialize) -> Result<()> {
        let path = self.root.join(rel);
        let tmp = tmp_name(&path);
        fs::write(&tmp, serde_json::to_vec(value)?)?;
        fs::rename(&tmp, &path)?;
        debug!("updated {}", path.display());
        Ok(())
    }

    /// Replace `network/stats`
    pub fn set_network_stats(&self, stats: &NetworkStats) -> Result<()> {
        self.write("network/stats", stats)
    }

    /// Replace `pool/stats`
    pub fn set_pool_stats(&self, stats: &PoolStats) -> Result<()> {
        self.write("pool/stats", stats)
    }

    /// Replace `pool/blocks` (newest first)
    pub fn set_pool_blocks(&self, blocks: &[FoundBlockRecord]) -> Result<()> {
        self.write("pool/blocks", &blocks)
    }

    /// Replace `stats_mod`
    pub fn set_stats_mod(&self, stats: &StatsMod) -> Result<()> {
        self.write("stats_mod", stats)
    }
}

fn tmp_name(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Abbreviate a hash the way the legacy dashboard expects: first four hex
/// characters, an ellipsis, last four.
pub fn abbreviated_hash(hash: &Hash) -> String {
    let hex = hash.to_hex();
    format!("{}...{}", &hex[..4], &hex[60..])
}
