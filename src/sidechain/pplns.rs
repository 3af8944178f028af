//! PPLNS reward arithmetic
//!
//! Pure share aggregation and proportional splitting; the engine supplies
//! the window contents, this module never touches the tree.

use crate::core::Hash;

/// One wallet's aggregated share of the window.
///
/// Entries keep window order: oldest contributor first, newest last. The
/// newest contributor absorbs the integer-division remainder, which is
/// what makes the split consensus-exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareEntry {
    /// Contributor public spend key
    pub spend_pub: Hash,
    /// Contributor public view key
    pub view_pub: Hash,
    /// Aggregated weight (sum of credited difficulty)
    pub weight: u128,
}

/// Ordered share accumulator
#[derive(Debug, Default)]
pub struct ShareLedger {
    entries: Vec<ShareEntry>,
}

impl ShareLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `weight` to a wallet, keeping first-contribution order
    pub fn credit(&mut self, spend_pub: Hash, view_pub: Hash, weight: u128) {
        if weight == 0 {
            return;
        }
        if let Some(e) = self
            .entries
            .iter_mut()
            .find(|e| e.spend_pub == spend_pub && e.view_pub == view_pub)
        {
            e.weight = e.weight.saturating_add(weight);
        } else {
            self.entries.push(ShareEntry {
                spend_pub,
                view_pub,
                weight,
            });
        }
    }

    /// Whether anything was credited
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finish and return the entries, oldest first
    pub fn into_entries(self) -> Vec<ShareEntry> {
        self.entries
    }
}

/// Split `total_reward` proportionally to the entry weights.
///
/// Integer division throughout; the remainder goes to the last (newest)
/// entry. Returns one amount per entry, in order.
pub fn split_reward(entries: &[ShareEntry], total_reward: u64) -> Vec<u64> {
    if entries.is_empty() {
        return Vec::new();
    }

    let total_weight: u128 = entries.iter().map(|e| e.weight).sum();
    if total_weight == 0 {
        let mut amounts = vec![0u64; entries.len()];
        *amounts.last_mut().expect("non-empty") = total_reward;
        return amounts;
    }

    let mut amounts: Vec<u64> = entries
        .iter()
        .map(|e| ((total_reward as u128 * e.weight) / total_weight) as u64)
        .collect();

    let assigned: u64 = amounts.iter().sum();
    *amounts.last_mut().expect("non-empty") += total_reward - assigned;
    amounts
}
