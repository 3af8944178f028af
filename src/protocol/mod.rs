//! Main-chain node protocol
//!
//! Typed JSON-RPC client plus the event types the external ZMQ reader
//! feeds into the orchestrator.

pub mod events;
pub mod rpc;

pub use events::{ChainMainEvent, EventQueue, NodeEvent};
pub use rpc::NodeRpcClient;

use crate::core::{Difficulty, Hash};
use crate::mempool::TxEntry;

/// Fresh mining snapshot from the node, one per main-chain tip change
#[derive(Debug, Clone, Default)]
pub struct MinerData {
    /// Hard-fork version to stamp into new blocks
    pub major_version: u8,
    /// Height of the block being mined
    pub height: u64,
    /// Id of the current main-chain tip
    pub prev_id: Hash,
    /// RandomX seed hash for this height
    pub seed_hash: Hash,
    /// Main-chain difficulty
    pub difficulty: Difficulty,
    /// Median block weight for the penalty function
    pub median_weight: u64,
    /// Supply already emitted, drives the base reward
    pub already_generated_coins: u64,
    /// Mempool backlog snapshot
    pub tx_backlog: Vec<TxEntry>,
}
