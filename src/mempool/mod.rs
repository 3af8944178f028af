//! Local view of the main-chain transaction pool
//!
//! An unordered set of pending transactions keyed by id. The template
//! builder is the only consumer and imposes its own fee-per-weight order.

use crate::core::Hash;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// A pending transaction as reported by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEntry {
    /// Transaction id
    pub id: Hash,
    /// Serialized size in bytes (0 when the node did not report it)
    #[serde(default)]
    pub blob_size: u32,
    /// Block weight of the transaction
    pub weight: u64,
    /// Total fee in atomic units
    pub fee: u64,
}

/// The mempool view
#[derive(Default)]
pub struct Mempool {
    transactions: HashMap<Hash, TxEntry>,
}

impl Mempool {
    /// Create an empty mempool
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one transaction. Zero weight or fee is rejected; re-adding a
    /// known id is a no-op.
    pub fn add(&mut self, tx: TxEntry) -> bool {
        if tx.weight == 0 || tx.fee == 0 {
            warn!(
                "invalid transaction: id = {}, weight = {}, fee = {}",
                tx.id, tx.weight, tx.fee
            );
            return false;
        }
        self.transactions.entry(tx.id).or_insert(tx);
        true
    }

    /// Replace the whole view with a fresh backlog snapshot
    pub fn swap(&mut self, backlog: Vec<TxEntry>) {
        self.transactions.clear();
        for tx in backlog {
            if tx.weight > 0 && tx.fee > 0 {
                self.transactions.insert(tx.id, tx);
            }
        }
    }

    /// Snapshot the current entries (no particular order)
    pub fn collect(&self) -> Vec<TxEntry> {
        self.transactions.values().copied().collect()
    }

    /// Number of pending transactions
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether the view is empty
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
