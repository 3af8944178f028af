//! Main-chain shadow
//!
//! A pruned cache of recent main-chain headers, kept by height and by id.
//! It answers seed-hash lookups for PoW verification and provides the
//! median-timestamp window for template building.

use crate::core::constants::{BLOCK_HEADERS_REQUIRED, SEED_EPOCH_BLOCKS, TIMESTAMP_WINDOW};
use crate::core::{Difficulty, Hash};
use crate::crypto::seed_height;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// A recent main-chain block header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MainChainHeader {
    /// Block height
    pub height: u64,
    /// Block id
    pub id: Hash,
    /// Block difficulty
    pub difficulty: Difficulty,
    /// Block timestamp (0 until the concrete header is downloaded)
    pub timestamp: u64,
    /// Coinbase reward (0 until the concrete header is downloaded)
    pub reward: u64,
}

impl MainChainHeader {
    fn is_stub(&self) -> bool {
        self.timestamp == 0 && self.reward == 0
    }
}

/// The shadow itself
#[derive(Default)]
pub struct MainChainShadow {
    by_height: BTreeMap<u64, MainChainHeader>,
    by_id: HashMap<Hash, u64>,
}

impl MainChainShadow {
    /// Create an empty shadow
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent upsert keeping the most complete version of a header.
    ///
    /// A stub learned from a miner-data push (timestamp and reward zero) is
    /// overwritten when the concrete header arrives; a stub never replaces
    /// a concrete header.
    pub fn ingest_header(&mut self, header: MainChainHeader) {
        let entry = self.by_height.entry(header.height).or_insert(header);
        if entry.is_stub() || !header.is_stub() {
            // keep whichever fields the new header actually carries
            if !header.id.is_zero() {
                entry.id = header.id;
            }
            if header.difficulty != Difficulty::ZERO {
                entry.difficulty = header.difficulty;
            }
            if !header.is_stub() {
                entry.timestamp = header.timestamp;
                entry.reward = header.reward;
            }
        }
        if !entry.id.is_zero() {
            self.by_id.insert(entry.id, entry.height);
        }
        trace!("shadow header at height {}", header.height);
    }

    /// Record what a miner-data push reveals: the difficulty of the block
    /// being mined and the id of its parent.
    pub fn note_miner_data(&mut self, height: u64, prev_id: Hash, difficulty: Difficulty) {
        self.by_height
            .entry(height)
            .or_insert_with(|| MainChainHeader {
                height,
                ..Default::default()
            })
            .difficulty = difficulty;

        if height > 0 {
            self.ingest_header(MainChainHeader {
                height: height - 1,
                id: prev_id,
                ..Default::default()
            });
        }
    }

    /// Look up a header by block id
    pub fn by_id(&self, id: &Hash) -> Option<MainChainHeader> {
        self.by_id
            .get(id)
            .and_then(|h| self.by_height.get(h))
            .copied()
    }

    /// Look up a header by height
    pub fn by_height(&self, height: u64) -> Option<MainChainHeader> {
        self.by_height.get(&height).copied()
    }

    /// Difficulty of the main chain at `height`, if known
    pub fn difficulty_at(&self, height: u64) -> Option<Difficulty> {
        self.by_height.get(&height).map(|h| h.difficulty)
    }

    /// Seed hash for PoW at `height`, if the seed header is cached
    pub fn seed_hash(&self, height: u64) -> Option<Hash> {
        self.by_height
            .get(&seed_height(height))
            .map(|h| h.id)
            .filter(|id| !id.is_zero())
    }

    /// Heights inside the retention window with no cached header yet.
    ///
    /// The orchestrator re-requests these from the node.
    pub fn missing_heights(&self, tip_height: u64) -> Vec<u64> {
        let mut missing = Vec::new();
        let mut h = tip_height;
        while h > 0 && h + BLOCK_HEADERS_REQUIRED > tip_height {
            if !self.by_height.contains_key(&h) {
                missing.push(h);
            }
            h -= 1;
        }
        missing
    }

    /// Median of the most recent `TIMESTAMP_WINDOW` timestamps.
    ///
    /// Shifted one index up against the reference chain's own median
    /// because the block currently being mined is not in the window yet.
    /// Returns 0 until the window is filled.
    pub fn median_timestamp(&self) -> u64 {
        if self.by_height.len() < TIMESTAMP_WINDOW {
            return 0;
        }
        let mut timestamps: Vec<u64> = self
            .by_height
            .values()
            .rev()
            .take(TIMESTAMP_WINDOW)
            .map(|h| h.timestamp)
            .collect();
        timestamps.sort_unstable();
        (timestamps[TIMESTAMP_WINDOW / 2] + timestamps[TIMESTAMP_WINDOW / 2 + 1]) / 2
    }

    /// Drop headers older than the retention window, keeping the three most
    /// recent seed-epoch heights indefinitely.
    pub fn prune(&mut self, current_height: u64) {
        let seed = seed_height(current_height);
        let keep = [
            Some(seed),
            seed.checked_sub(SEED_EPOCH_BLOCKS),
            seed.checked_sub(SEED_EPOCH_BLOCKS * 2),
        ];

        let cutoff = current_height.saturating_sub(BLOCK_HEADERS_REQUIRED);
        let stale: Vec<u64> = self
            .by_height
            .range(..cutoff)
            .map(|(h, _)| *h)
            .filter(|h| !keep.contains(&Some(*h)))
            .collect();
        for h in stale {
            if let Some(header) = self.by_height.remove(&h) {
                self.by_id.remove(&header.id);
            }
        }
    }

    /// Number of cached headers
    pub fn len(&self) -> usize {
        self.by_height.len()
    }

    /// Whether the shadow is empty
    pub fn is_empty(&self) -> bool {
        self.by_height.is_empty()
    }
}
