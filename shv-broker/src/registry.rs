//! The cross-connection peer registry: each connected peer's outbound
//! byte sink, reachable by cid from another peer's stage so a forwarded
//! request, a routed response, or a signal fan-out can cross from one
//! connection's task into another's. Generalizes the teacher's in-memory
//! channel transport pair (`rapace-core`'s `transport::mem`, built on
//! `tokio::sync::mpsc`) from exactly two peers to however many are
//! connected to the broker at once.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

#[derive(Clone, Default)]
pub struct PeerRegistry {
    senders: Arc<Mutex<HashMap<i64, mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `cid`'s outbox, returning the receiving half the
    /// connection's own task should drain and write out over its
    /// transport.
    pub fn register(&self, cid: i64) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().insert(cid, tx);
        rx
    }

    pub fn unregister(&self, cid: i64) {
        self.senders.lock().remove(&cid);
    }

    /// Sends a complete, pre-encoded message to `cid`. Returns `false` if
    /// `cid` isn't connected (or its receiver has been dropped).
    pub fn send_to(&self, cid: i64, bytes: Vec<u8>) -> bool {
        self.senders.lock().get(&cid).is_some_and(|tx| tx.send(bytes).is_ok())
    }

    /// A clone of `cid`'s sender, for building a [`shv_chainpack::Multipack`]
    /// over several recipients at once.
    pub fn sender(&self, cid: i64) -> Option<mpsc::UnboundedSender<Vec<u8>>> {
        self.senders.lock().get(&cid).cloned()
    }
}
