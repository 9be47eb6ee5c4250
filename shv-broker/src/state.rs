//! The broker's shared state: the peer table, cid allocation with a
//! quarantine on reuse, mounts, subscriptions, and roles. Guarded by a
//! single mutex acquired briefly, mirroring the session-state pattern the
//! handler layer already uses for per-channel bookkeeping.

use std::collections::HashMap;

use shv_value::AccessLevel;

use crate::mount::{MountError, MountTable};
use crate::role::Role;
use crate::subscription::SubscriptionTable;

/// Seconds a disconnected cid is held back from reallocation, so a stale
/// response arriving after unregister can't be routed to a new peer.
pub const CID_QUARANTINE_SECS: u64 = 600;

#[derive(Debug, Clone, Default)]
pub struct PeerRecord {
    pub cid: i64,
    pub role: Option<String>,
    pub nonce: Option<String>,
    pub username: Option<String>,
    pub access_level: AccessLevel,
    pub last_activity_ms: u64,
}

struct Quarantined {
    cid: i64,
    released_at_ms: u64,
}

#[derive(Default)]
pub struct BrokerState {
    peers: HashMap<i64, PeerRecord>,
    next_cid: i64,
    quarantine: Vec<Quarantined>,
    pub mounts: MountTable,
    pub subscriptions: SubscriptionTable,
    pub roles: HashMap<String, Role>,
    pub broker_name: String,
}

impl BrokerState {
    pub fn new() -> Self {
        Self { next_cid: 1, broker_name: "shvbroker".to_string(), ..Default::default() }
    }

    /// Allocates a fresh cid, skipping any still in quarantine.
    pub fn allocate_cid(&mut self, now_ms: u64) -> i64 {
        self.quarantine.retain(|q| now_ms < q.released_at_ms + CID_QUARANTINE_SECS * 1000);
        loop {
            let cid = self.next_cid;
            self.next_cid += 1;
            if !self.quarantine.iter().any(|q| q.cid == cid) {
                self.peers.insert(cid, PeerRecord { cid, ..Default::default() });
                return cid;
            }
        }
    }

    pub fn peer(&self, cid: i64) -> Option<&PeerRecord> {
        self.peers.get(&cid)
    }

    pub fn peer_mut(&mut self, cid: i64) -> Option<&mut PeerRecord> {
        self.peers.get_mut(&cid)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Drops a peer's record, quarantining its cid against reuse, and
    /// cleans up its mount and subscriptions.
    pub fn unregister(&mut self, cid: i64, now_ms: u64) {
        self.peers.remove(&cid);
        self.mounts.remove_cid(cid);
        self.subscriptions.unsubscribe_all(cid);
        self.quarantine.push(Quarantined { cid, released_at_ms: now_ms });
    }

    pub fn register_mount(&mut self, cid: i64, path: &str) -> Result<(), MountError> {
        self.mounts.insert(path, cid)
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }
}
