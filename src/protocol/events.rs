//! Node events and the bounded intake queue

use crate::mempool::TxEntry;
use crate::protocol::MinerData;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// A new main-chain block announcement (`json-minimal-chain_main`)
#[derive(Debug, Clone, Default)]
pub struct ChainMainEvent {
    /// Height of the new block
    pub height: u64,
    /// Block timestamp
    pub timestamp: u64,
    /// Coinbase reward
    pub reward: u64,
    /// Hex of the miner tx extra, if the announcement carried it; a
    /// merge-mined side-chain id sits at its tail
    pub miner_tx_extra: Option<String>,
}

/// One message from the node's pub/sub stream
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// `json-minimal-chain_main`
    ChainMain(ChainMainEvent),
    /// `json-full-miner_data`
    MinerData(Box<MinerData>),
    /// `json-full-txpool_add`
    TxPoolAdd(Vec<TxEntry>),
}

impl NodeEvent {
    fn droppable(&self) -> bool {
        matches!(self, NodeEvent::TxPoolAdd(_))
    }
}

/// Bounded intake queue between the ZMQ reader and the event loop.
///
/// When full, the oldest `txpool_add` event is discarded first; miner-data
/// and chain-main events are never dropped, the queue grows past its bound
/// instead (the reader is the only producer, so this stays small).
pub struct EventQueue {
    inner: Mutex<VecDeque<NodeEvent>>,
    notify: Notify,
    capacity: usize,
}

impl EventQueue {
    /// Create a queue with the given soft bound
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        })
    }

    /// Enqueue an event, applying the drop policy
    pub fn push(&self, event: NodeEvent) {
        {
            let mut q = self.inner.lock();
            if q.len() >= self.capacity {
                if let Some(idx) = q.iter().position(|e| e.droppable()) {
                    q.remove(idx);
                    warn!("event queue full, dropped oldest txpool_add");
                } else if event.droppable() {
                    warn!("event queue full, dropped incoming txpool_add");
                    return;
                }
            }
            q.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Wait for and take the next event
    pub async fn pop(&self) -> NodeEvent {
        loop {
            if let Some(e) = self.inner.lock().pop_front() {
                return e;
            }
            self.notify.notified().await;
        }
    }

    /// Take the next event if one is ready
    pub fn try_pop(&self) -> Option<NodeEvent> {
        self.inner.lock().pop_front()
    }

    /// Queued event count
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Hash;

    fn txpool_event(n: u8) -> NodeEvent {
        NodeEvent::TxPoolAdd(vec![TxEntry {
            id: Hash::from_bytes([n; 32]),
            blob_size: 0,
            weight: 1,
            fee: 1,
        }])
    }

    #[test]
    fn test_overflow_drops_oldest_txpool() {
        let q = EventQueue::new(2);
        q.push(txpool_event(1));
        q.push(NodeEvent::ChainMain(ChainMainEvent::default()));
        q.push(txpool_event(2));
        assert_eq!(q.len(), 2);

        // the first txpool event was sacrificed
        match q.try_pop().unwrap() {
            NodeEvent::ChainMain(_) => {}
            other => panic!("expected chain_main first, got {:?}", other),
        }
        match q.try_pop().unwrap() {
            NodeEvent::TxPoolAdd(txs) => assert_eq!(txs[0].id, Hash::from_bytes([2; 32])),
            other => panic!("expected txpool, got {:?}", other),
        }
    }

    #[test]
    fn test_critical_events_never_dropped() {
        let q = EventQueue::new(1);
        q.push(NodeEvent::ChainMain(ChainMainEvent::default()));
        q.push(NodeEvent::MinerData(Box::default()));
        // both kept even though the bound is 1
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let q = EventQueue::new(4);
        let q2 = Arc::clone(&q);
        let handle = tokio::spawn(async move { q2.pop().await });
        tokio::task::yield_now().await;
        q.push(NodeEvent::ChainMain(ChainMainEvent::default()));
        let got = handle.await.unwrap();
        assert!(matches!(got, NodeEvent::ChainMain(_)));
    }
}
