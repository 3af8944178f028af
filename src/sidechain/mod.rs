//! Side-chain engine
//!
//! Authoritative validation, fork-tree bookkeeping, and tip selection for
//! the PPLNS side chain. The engine is deliberately effect-free: `ingest`
//! returns what happened plus the follow-up work (peer requests, found
//! blocks) and the orchestrator performs the I/O, so acceptance order can
//! commute across event sources.

pub mod params;
pub mod pplns;

pub use params::NetworkParams;
pub use pplns::{split_reward, ShareEntry, ShareLedger};

use crate::block::PoolBlock;
use crate::core::{Difficulty, Hash};
use crate::crypto::{DerivationCache, NetworkType};
use crate::mainchain::MainChainHeader;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on buffered orphans
const ORPHAN_LIMIT: usize = 100;

/// Why a block was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// Malformed or self-inconsistent block
    Structural(&'static str),
    /// PoW does not meet the declared side-chain difficulty
    BadPow,
    /// Declared difficulty disagrees with the adjustment algorithm
    WrongDifficulty,
    /// Declared cumulative difficulty disagrees with the parent chain
    WrongCumulativeDifficulty,
    /// Coinbase outputs do not match the PPLNS split
    BadRewardSplit(&'static str),
    /// Uncle list violates depth, ordering, or inclusion rules
    BadUncles(&'static str),
    /// Fork point is outside the PPLNS window
    DeepReorg,
}

impl InvalidReason {
    /// Whether the gossiping peer should be banned permanently.
    ///
    /// Deep reorgs can come from honest peers that were offline, so they
    /// are rejected without a ban.
    pub fn bans_peer(&self) -> bool {
        !matches!(self, InvalidReason::DeepReorg)
    }
}

/// Result of offering one block to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Block entered the tree
    Added {
        /// Whether it became the new tip
        new_tip: bool,
    },
    /// Duplicate, silently ignored
    AlreadyHave,
    /// A dependency is missing; the block is parked
    Orphaned,
    /// Rejected
    Invalid(InvalidReason),
}

/// Everything `ingest` wants the orchestrator to do afterwards
#[derive(Debug, Default)]
pub struct IngestResult {
    /// What happened to the offered block
    pub outcome: Option<AcceptOutcome>,
    /// Whether the tip moved (directly or through an orphan cascade)
    pub tip_changed: bool,
    /// Watched main-chain blocks confirmed as mined by this pool
    pub found: Vec<MainChainHeader>,
    /// Missing dependencies to request from peers
    pub request: Vec<Hash>,
}

struct OrphanEntry {
    received: Instant,
    block: PoolBlock,
    pow_hash: Hash,
}

/// The side-chain state
pub struct SideChain {
    params: NetworkParams,
    blocks: HashMap<Hash, PoolBlock>,
    tip: Option<Hash>,
    /// Parked blocks keyed by the dependency they wait for
    orphans: HashMap<Hash, Vec<OrphanEntry>>,
    orphan_count: usize,
    /// Main-chain blocks whose claimed side-chain id is not known yet
    watch: HashMap<Hash, MainChainHeader>,
    derivations: DerivationCache,
}

impl SideChain {
    /// Create an empty engine for a network
    pub fn new(params: NetworkParams) -> Self {
        Self {
            params,
            blocks: HashMap::new(),
            tip: None,
            orphans: HashMap::new(),
            orphan_count: 0,
            watch: HashMap::new(),
            derivations: DerivationCache::new(),
        }
    }

    /// Network this engine enforces
    pub fn network(&self) -> NetworkType {
        self.params.network
    }

    /// Consensus parameters
    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// Whether a block id is in the tree
    pub fn has_block(&self, id: &Hash) -> bool {
        self.blocks.contains_key(id)
    }

    /// Fetch a block by side-chain id
    pub fn get(&self, id: &Hash) -> Option<&PoolBlock> {
        self.blocks.get(id)
    }

    /// Current tip id
    pub fn tip(&self) -> Option<Hash> {
        self.tip
    }

    /// Current tip block
    pub fn tip_block(&self) -> Option<&PoolBlock> {
        self.tip.and_then(|id| self.blocks.get(&id))
    }

    /// Side-chain height of the tip
    pub fn tip_height(&self) -> Option<u64> {
        self.tip_block().map(|b| b.side.height)
    }

    /// Number of blocks in the tree
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the tree is empty
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Cumulative work at the tip
    pub fn total_hashes(&self) -> Difficulty {
        self.tip_block()
            .map(|b| b.side.cumulative_difficulty)
            .unwrap_or(Difficulty::ZERO)
    }

    /// Difficulty the next block on the tip must meet
    pub fn current_difficulty(&self) -> Difficulty {
        self.next_difficulty(self.tip.as_ref())
    }

    /// Distinct wallets in the current PPLNS window
    pub fn miner_count(&self) -> usize {
        let Some(tip) = self.tip else { return 0 };
        let mut wallets = HashSet::new();
        for b in self.window_chain(&tip) {
            wallets.insert((b.side.spend_pub, b.side.view_pub));
            for u in &b.side.uncles {
                if let Some(ub) = self.blocks.get(u) {
                    wallets.insert((ub.side.spend_pub, ub.side.view_pub));
                }
            }
        }
        wallets.len()
    }

    /// Register a main-chain block that claims a side-chain id we do not
    /// know yet; acceptance of that id later reports a found block.
    pub fn watch_main_chain_block(&mut self, header: MainChainHeader, side_id: Hash) {
        debug!(
            "watching main-chain block {} for side-chain id {}",
            header.height, side_id
        );
        self.watch.insert(side_id, header);
    }

    /// Offer a block to the engine.
    ///
    /// `pow_hash` is the verified PoW output for the block's hashing blob;
    /// the orchestrator computes it with the seed for the block's
    /// main-chain height before taking the side-chain lock.
    pub fn ingest(&mut self, block: PoolBlock, pow_hash: Hash) -> IngestResult {
        let mut result = IngestResult::default();
        let mut queue = vec![(block, pow_hash)];

        while let Some((b, pow)) = queue.pop() {
            let accepted = self.ingest_one(b, pow, &mut result);
            if let Some(id) = accepted {
                if let Some(waiters) = self.orphans.remove(&id) {
                    self.orphan_count -= waiters.len();
                    for w in waiters {
                        queue.push((w.block, w.pow_hash));
                    }
                }
            }
        }
        result
    }

    fn record_outcome(&self, result: &mut IngestResult, outcome: AcceptOutcome) {
        // only the directly offered block reports an outcome; cascaded
        // orphans surface through tip_changed / found
        if result.outcome.is_none() {
            result.outcome = Some(outcome);
        }
    }

    fn ingest_one(
        &mut self,
        block: PoolBlock,
        pow_hash: Hash,
        result: &mut IngestResult,
    ) -> Option<Hash> {
        let id = block.side.id;

        if self.blocks.contains_key(&id) {
            self.record_outcome(result, AcceptOutcome::AlreadyHave);
            return None;
        }

        if let Err(reason) = self.check_structural(&block, &pow_hash) {
            warn!("rejecting side-chain block {}: {:?}", id, reason);
            self.record_outcome(result, AcceptOutcome::Invalid(reason));
            return None;
        }

        if let Some(missing) = self.missing_dependency(&block) {
            self.park_orphan(missing, block, pow_hash);
            result.request.push(missing);
            self.record_outcome(result, AcceptOutcome::Orphaned);
            return None;
        }

        if let Err(reason) = self.validate_in_context(&block) {
            warn!("rejecting side-chain block {}: {:?}", id, reason);
            self.record_outcome(result, AcceptOutcome::Invalid(reason));
            return None;
        }

        let height = block.side.height;
        let cumulative = block.side.cumulative_difficulty;
        self.blocks.insert(id, block);
        debug!(
            "accepted side-chain block {} at height {}, cumulative difficulty {}",
            id, height, cumulative
        );

        if let Some(header) = self.watch.remove(&id) {
            result.found.push(header);
        }

        let new_tip = self.try_advance_tip(&id);
        if new_tip {
            info!("new side-chain tip {} at height {}", id, height);
            result.tip_changed = true;
        }
        self.record_outcome(result, AcceptOutcome::Added { new_tip });

        self.prune_old();
        Some(id)
    }

    fn check_structural(
        &self,
        block: &PoolBlock,
        pow_hash: &Hash,
    ) -> Result<(), InvalidReason> {
        if block.compute_side_chain_id() != block.side.id {
            return Err(InvalidReason::Structural("side-chain id mismatch"));
        }

        if block.side.parent.is_zero() {
            if block.side.height != 0 {
                return Err(InvalidReason::Structural("null parent on non-genesis"));
            }
            if !self.params.genesis_id.is_zero() && block.side.id != self.params.genesis_id {
                return Err(InvalidReason::Structural("unknown genesis block"));
            }
        } else if block.side.height == 0 {
            return Err(InvalidReason::Structural("genesis with a parent"));
        }

        if !block.side.difficulty.check_pow(pow_hash) {
            return Err(InvalidReason::BadPow);
        }

        if let Some(tip_height) = self.tip_height() {
            if block.side.height + self.params.window_size <= tip_height {
                return Err(InvalidReason::DeepReorg);
            }
        }

        Ok(())
    }

    fn missing_dependency(&self, block: &PoolBlock) -> Option<Hash> {
        if !block.side.parent.is_zero() && !self.blocks.contains_key(&block.side.parent) {
            return Some(block.side.parent);
        }
        block
            .side
            .uncles
            .iter()
            .find(|u| !self.blocks.contains_key(u))
            .copied()
    }

    fn park_orphan(&mut self, missing: Hash, block: PoolBlock, pow_hash: Hash) {
        debug!(
            "parking orphan {} waiting for {}",
            block.side.id, missing
        );
        self.orphans.entry(missing).or_default().push(OrphanEntry {
            received: Instant::now(),
            block,
            pow_hash,
        });
        self.orphan_count += 1;

        while self.orphan_count > ORPHAN_LIMIT {
            // evict the oldest entry across all buckets
            let oldest_key = self
                .orphans
                .iter()
                .min_by_key(|(_, v)| v.first().map(|e| e.received).unwrap_or_else(Instant::now))
                .map(|(k, _)| *k);
            let Some(key) = oldest_key else { break };
            if let Some(bucket) = self.orphans.get_mut(&key) {
                bucket.remove(0);
                self.orphan_count -= 1;
                if bucket.is_empty() {
                    self.orphans.remove(&key);
                }
            }
        }
    }

    /// Drop orphans older than `max_age`; returns how many were removed
    pub fn expire_orphans(&mut self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut dropped = 0;
        self.orphans.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|e| now.duration_since(e.received) <= max_age);
            dropped += before - bucket.len();
            !bucket.is_empty()
        });
        self.orphan_count -= dropped;
        dropped
    }

    /// Buffered orphan count
    pub fn orphan_count(&self) -> usize {
        self.orphan_count
    }

    fn validate_in_context(&mut self, block: &PoolBlock) -> Result<(), InvalidReason> {
        if !block.side.parent.is_zero() {
            let parent = self
                .blocks
                .get(&block.side.parent)
                .expect("dependency checked");
            if parent.side.height + 1 != block.side.height {
                return Err(InvalidReason::Structural("parent height mismatch"));
            }
        }

        let parent = (!block.side.parent.is_zero()).then_some(&block.side.parent);
        if block.side.difficulty != self.next_difficulty(parent) {
            return Err(InvalidReason::WrongDifficulty);
        }

        self.validate_uncles(block)?;

        let mut expected_cum = block.side.difficulty;
        if let Some(pid) = parent {
            expected_cum += self.blocks[pid].side.cumulative_difficulty;
        }
        for u in &block.side.uncles {
            expected_cum += self.blocks[u].side.difficulty;
        }
        if block.side.cumulative_difficulty != expected_cum {
            return Err(InvalidReason::WrongCumulativeDifficulty);
        }

        if self.tip.is_some() && parent.is_some() {
            let tip = self.tip.expect("checked");
            if !self.shares_recent_ancestor(&block.side.parent, &tip) {
                return Err(InvalidReason::DeepReorg);
            }
        }

        self.validate_reward_split(block)
    }

    fn validate_uncles(&self, block: &PoolBlock) -> Result<(), InvalidReason> {
        if block.side.uncles.is_empty() {
            return Ok(());
        }
        for pair in block.side.uncles.windows(2) {
            if pair[0] >= pair[1] {
                return Err(InvalidReason::BadUncles("uncles not strictly ascending"));
            }
        }

        // ancestor line and their uncle lists within the depth limit
        let mut line = Vec::new();
        let mut cursor = block.side.parent;
        for _ in 0..self.params.uncle_depth {
            let Some(b) = self.blocks.get(&cursor) else { break };
            line.push(b);
            cursor = b.side.parent;
            if cursor.is_zero() {
                break;
            }
        }

        for u in &block.side.uncles {
            let uncle = self.blocks.get(u).expect("dependency checked");
            let depth = block
                .side
                .height
                .checked_sub(uncle.side.height)
                .unwrap_or(0);
            if depth == 0 || depth > self.params.uncle_depth {
                return Err(InvalidReason::BadUncles("uncle outside depth window"));
            }
            if line.iter().any(|a| a.side.id == *u) {
                return Err(InvalidReason::BadUncles("uncle on ancestor line"));
            }
            if line.iter().any(|a| a.side.uncles.contains(u)) {
                return Err(InvalidReason::BadUncles("uncle already credited"));
            }
        }
        Ok(())
    }

    fn validate_reward_split(&mut self, block: &PoolBlock) -> Result<(), InvalidReason> {
        let entries = self
            .payout_entries(
                &block.side.parent,
                &block.side.uncles,
                (block.side.spend_pub, block.side.view_pub),
            )
            .ok_or(InvalidReason::BadRewardSplit("window walk failed"))?;
        let amounts = split_reward(&entries, block.total_reward());

        if amounts.len() != block.miner_tx.outputs.len() {
            return Err(InvalidReason::BadRewardSplit("output count"));
        }
        for (i, (entry, amount)) in entries.iter().zip(&amounts).enumerate() {
            let out = &block.miner_tx.outputs[i];
            if out.amount != *amount {
                return Err(InvalidReason::BadRewardSplit("output amount"));
            }
            let expected_key = self
                .derivations
                .derive_output_key(
                    &block.side.tx_secret,
                    &entry.view_pub,
                    &entry.spend_pub,
                    i as u64,
                )
                .ok_or(InvalidReason::BadRewardSplit("bad contributor keys"))?;
            if out.key != expected_key {
                return Err(InvalidReason::BadRewardSplit("output key"));
            }
        }
        Ok(())
    }

    /// Aggregated PPLNS shares for a block built on `parent` crediting
    /// `uncles`, in window order (oldest first, newest last).
    ///
    /// The window ends at the parent; a creator with no prior share in the
    /// window only appears through uncle penalties, or alone at genesis.
    /// Returns `None` when an uncle id is unknown.
    pub fn payout_entries(
        &self,
        parent: &Hash,
        uncles: &[Hash],
        own_wallet: (Hash, Hash),
    ) -> Option<Vec<ShareEntry>> {
        let penalty = self.params.uncle_penalty_percent as u128;
        let mut ledger = ShareLedger::new();

        let chain = self.window_chain(parent);
        for b in chain.iter().rev() {
            for u in &b.side.uncles {
                if let Some(ub) = self.blocks.get(u) {
                    let w = ub.side.difficulty.0;
                    ledger.credit(ub.side.spend_pub, ub.side.view_pub, w * (100 - penalty) / 100);
                    ledger.credit(b.side.spend_pub, b.side.view_pub, w * penalty / 100);
                }
            }
            ledger.credit(b.side.spend_pub, b.side.view_pub, b.side.difficulty.0);
        }

        for u in uncles {
            let ub = self.blocks.get(u)?;
            let w = ub.side.difficulty.0;
            ledger.credit(ub.side.spend_pub, ub.side.view_pub, w * (100 - penalty) / 100);
            ledger.credit(own_wallet.0, own_wallet.1, w * penalty / 100);
        }

        if ledger.is_empty() {
            ledger.credit(own_wallet.0, own_wallet.1, 1);
        }
        Some(ledger.into_entries())
    }

    /// Blocks on the ancestor line starting at `start`, newest first, up to
    /// the window size. Stops early at genesis or pruned history.
    fn window_chain(&self, start: &Hash) -> Vec<&PoolBlock> {
        let mut chain = Vec::new();
        let mut cursor = *start;
        while chain.len() < self.params.window_size as usize {
            if cursor.is_zero() {
                break;
            }
            match self.blocks.get(&cursor) {
                Some(b) => {
                    chain.push(b);
                    cursor = b.side.parent;
                }
                None => break,
            }
        }
        chain
    }

    /// Difficulty adjustment over the parent chain.
    ///
    /// Sorts the last `diff_window` (timestamp, cumulative work) pairs by
    /// timestamp, trims `diff_cut` from each end, and scales the work span
    /// by the target block time over the time span.
    pub fn next_difficulty(&self, parent: Option<&Hash>) -> Difficulty {
        let Some(pid) = parent else {
            return self.params.min_difficulty;
        };

        let mut samples: Vec<(u64, u128)> = Vec::new();
        let mut cursor = *pid;
        while samples.len() < self.params.diff_window as usize {
            if cursor.is_zero() {
                break;
            }
            match self.blocks.get(&cursor) {
                Some(b) => {
                    samples.push((b.header.timestamp, b.side.cumulative_difficulty.0));
                    cursor = b.side.parent;
                }
                None => break,
            }
        }
        if samples.len() < 2 {
            return self.params.min_difficulty;
        }

        samples.sort_unstable();
        let cut = self.params.diff_cut;
        let (i1, i2) = if samples.len() > cut * 2 + 1 {
            (cut, samples.len() - 1 - cut)
        } else {
            (0, samples.len() - 1)
        };

        let total_time = (samples[i2].0.saturating_sub(samples[i1].0)).max(1);
        let total_work = samples[i2].1.saturating_sub(samples[i1].1);
        let next = total_work
            .saturating_mul(self.params.block_time as u128)
            / total_time as u128;

        Difficulty::new(next).max(self.params.min_difficulty)
    }

    fn try_advance_tip(&mut self, candidate: &Hash) -> bool {
        let cand = &self.blocks[candidate];
        let better = match self.tip {
            None => true,
            Some(tip_id) => {
                let tip = &self.blocks[&tip_id];
                match cand
                    .side
                    .cumulative_difficulty
                    .cmp(&tip.side.cumulative_difficulty)
                {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Equal => *candidate < tip_id,
                    std::cmp::Ordering::Less => false,
                }
            }
        };
        if better {
            self.tip = Some(*candidate);
        }
        better
    }

    /// Whether `a`'s chain and `b`'s chain meet within the window
    fn shares_recent_ancestor(&self, a: &Hash, b: &Hash) -> bool {
        let mut seen = HashSet::new();
        let mut cursor = *a;
        for _ in 0..self.params.window_size {
            if cursor.is_zero() {
                // reached genesis: every chain shares it
                seen.insert(cursor);
                break;
            }
            seen.insert(cursor);
            match self.blocks.get(&cursor) {
                Some(blk) => cursor = blk.side.parent,
                None => break,
            }
        }

        let mut cursor = *b;
        for _ in 0..self.params.window_size {
            if seen.contains(&cursor) {
                return true;
            }
            if cursor.is_zero() {
                return seen.contains(&Hash::ZERO);
            }
            match self.blocks.get(&cursor) {
                Some(blk) => cursor = blk.side.parent,
                None => return false,
            }
        }
        false
    }

    /// Uncle candidates for a block extending the tip: known blocks within
    /// the depth limit that are neither on the tip's ancestor line nor
    /// already credited by it, sorted ascending.
    pub fn uncle_candidates(&self) -> Vec<Hash> {
        let Some(tip) = self.tip else {
            return Vec::new();
        };
        let new_height = self.blocks[&tip].side.height + 1;

        let mut line = HashSet::new();
        let mut credited = HashSet::new();
        let mut cursor = tip;
        for _ in 0..=self.params.uncle_depth {
            let Some(b) = self.blocks.get(&cursor) else { break };
            line.insert(b.side.id);
            credited.extend(b.side.uncles.iter().copied());
            cursor = b.side.parent;
            if cursor.is_zero() {
                break;
            }
        }

        let mut candidates: Vec<Hash> = self
            .blocks
            .values()
            .filter(|b| {
                let depth = new_height.saturating_sub(b.side.height);
                (1..=self.params.uncle_depth).contains(&depth)
                    && !line.contains(&b.side.id)
                    && !credited.contains(&b.side.id)
            })
            .map(|b| b.side.id)
            .collect();
        candidates.sort();
        candidates
    }

    /// Drop cached key derivations (called when a block is found)
    pub fn clear_caches(&mut self) {
        self.derivations.clear();
    }

    fn prune_old(&mut self) {
        let Some(tip_height) = self.tip_height() else { return };
        let keep_depth = self.params.window_size + self.params.prune_distance;
        let Some(cutoff) = tip_height.checked_sub(keep_depth) else {
            return;
        };
        self.blocks.retain(|_, b| b.side.height >= cutoff);
    }
}
