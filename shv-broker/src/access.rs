//! The access stage: before dispatch, records `min(incoming, role access)`
//! for `(path, method)` on the peer record, so forwarding and `.broker`
//! built-ins never grant more than the weakest hop allowed.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use shv_handler::{DirCtx, IdleCtx, LsCtx, MethodDescriptor, MsgCtx, Stage, StageResult};
use shv_value::AccessLevel;

use crate::state::BrokerState;

/// `min(incoming, role_access(path, method))`, also writing the result
/// onto `cid`'s peer record.
fn record_access(state: &mut BrokerState, cid: i64, incoming: AccessLevel, path: &str, method: &str) -> AccessLevel {
    let role_access = state
        .peer(cid)
        .and_then(|p| p.role.clone())
        .and_then(|role_name| state.role(&role_name).cloned())
        .map(|role| role.access_for(path, method))
        .unwrap_or(AccessLevel::None);
    let effective = incoming.min(role_access);
    if let Some(peer) = state.peer_mut(cid) {
        peer.access_level = effective;
    }
    effective
}

pub struct AccessStage {
    cid: i64,
    state: Arc<Mutex<BrokerState>>,
}

impl AccessStage {
    pub fn new(cid: i64, state: Arc<Mutex<BrokerState>>) -> Self {
        Self { cid, state }
    }
}

impl Stage for AccessStage {
    fn msg(&mut self, ctx: &mut MsgCtx<'_>) -> io::Result<StageResult> {
        let incoming = ctx.meta().access_level.unwrap_or(AccessLevel::Admin);
        let method = ctx.method().unwrap_or("").to_string();
        let path = ctx.path().to_string();
        record_access(&mut self.state.lock(), self.cid, incoming, &path, &method);
        Ok(StageResult::NotHandled)
    }

    fn ls(&mut self, _ctx: &LsCtx<'_>) -> Vec<String> {
        Vec::new()
    }

    fn dir(&mut self, _ctx: &DirCtx<'_>) -> Vec<MethodDescriptor> {
        Vec::new()
    }

    fn idle(&mut self, _ctx: &mut IdleCtx<'_>) -> Option<u64> {
        None
    }

    fn reset(&mut self) {
        if let Some(peer) = self.state.lock().peer_mut(self.cid) {
            peer.access_level = AccessLevel::None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;

    #[test]
    fn records_minimum_of_incoming_and_role_access() {
        let mut state = BrokerState::new();
        let cid = state.allocate_cid(0);
        state.roles.insert("viewer".to_string(), Role::new("viewer").grant(AccessLevel::Read, ["**:*"]));
        state.peer_mut(cid).unwrap().role = Some("viewer".to_string());

        let effective = record_access(&mut state, cid, AccessLevel::Write, "test/device", "get");
        assert_eq!(effective, AccessLevel::Read);
        assert_eq!(state.peer(cid).unwrap().access_level, AccessLevel::Read);
    }

    #[test]
    fn no_role_yields_no_access() {
        let mut state = BrokerState::new();
        let cid = state.allocate_cid(0);
        let effective = record_access(&mut state, cid, AccessLevel::Admin, "any/path", "get");
        assert_eq!(effective, AccessLevel::None);
    }

    #[test]
    fn incoming_ceiling_caps_a_generous_role() {
        let mut state = BrokerState::new();
        let cid = state.allocate_cid(0);
        state.roles.insert("admin".to_string(), Role::new("admin").grant(AccessLevel::Admin, ["**:*"]));
        state.peer_mut(cid).unwrap().role = Some("admin".to_string());

        let effective = record_access(&mut state, cid, AccessLevel::Browse, "any/path", "get");
        assert_eq!(effective, AccessLevel::Browse);
    }
}
