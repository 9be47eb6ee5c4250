//! The RPC stage: `.broker`/`.broker/currentClient` built-ins, and
//! forwarding of every other request to its mounted peer through the
//! broker's [`PeerRegistry`], driven by the pure, independently testable
//! `resolve_forward`/`pop_caller_id`/`matching_recipients` helpers below.

use std::io;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use shv_chainpack::{Packer, Unpacker};
use shv_handler::{DirCtx, IdleCtx, LsCtx, MethodDescriptor, MsgCtx, Signature, Stage, StageResult};
use shv_value::{AccessLevel, Item};

use crate::registry::PeerRegistry;
use crate::state::BrokerState;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// What forwarding a request through a mounted peer requires: where it
/// goes, with what path and addressing rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub target_cid: i64,
    pub relative_path: String,
    pub caller_ids: Vec<i64>,
    pub user_id: String,
}

/// Resolves a request path to its downstream peer, per spec: strip the
/// mount prefix, append the originator cid to `CallerIds`, and rewrite
/// `UserId` as `prev;user:broker`.
pub fn resolve_forward(
    state: &BrokerState,
    originator_cid: i64,
    path: &str,
    incoming_caller_ids: &[i64],
    incoming_user_id: Option<&str>,
) -> Option<ForwardTarget> {
    let (_, target_cid, relative_path) = state.mounts.lookup(path)?;
    let mut caller_ids = incoming_caller_ids.to_vec();
    caller_ids.push(originator_cid);
    let username = state.peer(originator_cid).and_then(|p| p.username.clone()).unwrap_or_default();
    let user_id = match incoming_user_id {
        Some(prev) if !prev.is_empty() => format!("{prev};{username}:{}", state.broker_name),
        _ => format!("{username}:{}", state.broker_name),
    };
    Some(ForwardTarget { target_cid, relative_path: relative_path.to_string(), caller_ids, user_id })
}

/// For a response/error's `CallerIds`, pops the tail to find the next-hop
/// peer, or `None` if the list is empty (no return path).
pub fn pop_caller_id(caller_ids: &[i64]) -> Option<(i64, Vec<i64>)> {
    let mut rest = caller_ids.to_vec();
    let last = rest.pop()?;
    Some((last, rest))
}

/// Recipients for a signal at `path` (broker-local, after the peer's mount
/// point has already been prefixed on), filtered by per-recipient access.
pub fn matching_recipients(state: &BrokerState, path: &str, source: &str, signal: &str) -> Vec<i64> {
    state
        .subscriptions
        .matching_cids(path, source, signal)
        .iter()
        .filter(|cid| {
            state
                .peer(*cid)
                .map(|p| p.access_level >= AccessLevel::Read)
                .unwrap_or(false)
        })
        .collect()
}

fn parse_single_string_param(payload: &[u8]) -> io::Result<Option<String>> {
    Ok(match shv_proto::find_imap_field(payload, &shv_proto::Limits::default(), shv_proto::imap_key::PARAM)? {
        Some(Item::String(c)) => Some(String::from_utf8(c.data).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "not utf8"))?),
        _ => None,
    })
}

/// `subscribe`'s param: either a bare RI string, or `[ri, ttl_seconds]`.
fn parse_subscribe_param(payload: &[u8]) -> io::Result<Option<(String, Option<u64>)>> {
    let mut u = Unpacker::chain_pack(payload);
    if !matches!(u.unpack()?, Item::Meta) {
        return Ok(None);
    }
    shv_proto::read_meta(&mut u, &shv_proto::Limits::default())?;
    if !matches!(u.unpack()?, Item::IMap) {
        return Ok(None);
    }
    loop {
        let key_item = u.unpack()?;
        if matches!(key_item, Item::ContainerEnd) {
            return Ok(None);
        }
        let key = key_item.as_int();
        let value = u.unpack()?;
        if key != Some(shv_proto::imap_key::PARAM) {
            if value.is_container_open() {
                u.skip(1)?;
            }
            continue;
        }
        return match value {
            Item::String(_) => Ok(Some((u.strdup(value, None)?, None))),
            Item::List => {
                let ri_item = u.unpack()?;
                let ri = u.strdup(ri_item, None)?;
                let ttl_item = u.unpack()?;
                let ttl = ttl_item.as_int().map(|v| v as u64);
                u.skip(1)?;
                Ok(Some((ri, ttl)))
            }
            other => {
                if other.is_container_open() {
                    u.skip(1)?;
                }
                Ok(None)
            }
        };
    }
}

pub struct RpcStage {
    cid: i64,
    state: Arc<Mutex<BrokerState>>,
    registry: PeerRegistry,
}

impl RpcStage {
    pub fn new(cid: i64, state: Arc<Mutex<BrokerState>>, registry: PeerRegistry) -> Self {
        Self { cid, state, registry }
    }

    /// Forwards a non-`.broker` request to its mounted peer, rewriting the
    /// envelope (path, `CallerIds`, `UserId`) and retransmitting the
    /// original `Param` content untouched. Returns `None` if `ctx.path()`
    /// isn't under any mount point.
    fn forward(&mut self, ctx: &mut MsgCtx<'_>) -> io::Result<Option<StageResult>> {
        let target = {
            let state = self.state.lock();
            resolve_forward(&state, self.cid, ctx.path(), &ctx.meta().caller_ids, ctx.meta().user_id.as_deref())
        };
        let Some(target) = target else {
            return Ok(None);
        };

        let (_, content) = shv_proto::split_meta(ctx.payload(), &shv_proto::Limits::default())?;
        let method = ctx.method().unwrap_or_default().to_string();
        let meta = shv_proto::RequestMeta {
            request_id: ctx.request_id().unwrap_or_default(),
            path: &target.relative_path,
            method: &method,
            caller_ids: &target.caller_ids,
            access_level: ctx.meta().access_level,
            access_granted: ctx.meta().access_granted.as_deref(),
            user_id: Some(&target.user_id),
        };
        let mut p = Packer::chain_pack(Vec::new());
        shv_proto::request_meta_only(&mut p, &meta)?;
        let Packer::ChainPack(w) = p else { unreachable!() };
        let mut bytes = w.into_inner();
        bytes.extend_from_slice(content);

        if self.registry.send_to(target.target_cid, bytes) {
            Ok(Some(StageResult::Deferred))
        } else {
            ctx.msg_error(&shv_proto::RpcError::new(
                shv_proto::ErrorCode::MethodCallException,
                format!("mounted peer for {} is not connected", ctx.path()),
            ))?;
            Ok(Some(StageResult::Done))
        }
    }

    fn handle_broker(&mut self, ctx: &mut MsgCtx<'_>) -> io::Result<bool> {
        let method = ctx.method().unwrap_or("").to_string();
        let state = self.state.clone();
        match method.as_str() {
            "name" => {
                let name = state.lock().broker_name.clone();
                ctx.msg_result_with(move |p| p.pack_string(&name).map(|_| ()))?;
            }
            "info" => {
                let name = state.lock().broker_name.clone();
                ctx.msg_result_with(move |p| {
                    p.map_begin()?;
                    p.pack_string("name")?;
                    p.pack_string(&name)?;
                    p.container_end()?;
                    Ok(())
                })?;
            }
            "clients" => {
                let cids: Vec<i64> = state.lock().peers().map(|p| p.cid).collect();
                ctx.msg_result_with(move |p| {
                    p.list_begin()?;
                    for cid in &cids {
                        p.pack_int(*cid)?;
                    }
                    p.container_end()?;
                    Ok(())
                })?;
            }
            "mounts" => {
                let paths: Vec<String> = state.lock().mounts.iter().map(|(path, _)| path.to_string()).collect();
                ctx.msg_result_with(move |p| {
                    p.list_begin()?;
                    for path in &paths {
                        p.pack_string(path)?;
                    }
                    p.container_end()?;
                    Ok(())
                })?;
            }
            "clientInfo" => {
                let target = ctx.param()?.and_then(|v| v.as_int());
                let Some(target) = target else {
                    ctx.msg_error(&shv_proto::RpcError::invalid_param("clientInfo needs an int cid"))?;
                    return Ok(true);
                };
                let info = state.lock().peer(target).cloned();
                ctx.msg_result_with(move |p| {
                    match info {
                        Some(peer) => {
                            p.map_begin()?;
                            p.pack_string("clientId")?;
                            p.pack_int(peer.cid)?;
                            p.pack_string("userName")?;
                            match &peer.username {
                                Some(u) => p.pack_string(u)?,
                                None => p.pack_null()?,
                            };
                            p.pack_string("role")?;
                            match &peer.role {
                                Some(r) => p.pack_string(r)?,
                                None => p.pack_null()?,
                            };
                            p.container_end()?;
                        }
                        None => {
                            p.pack_null()?;
                        }
                    }
                    Ok(())
                })?;
            }
            "mountedClientInfo" => {
                let Some(path) = parse_single_string_param(ctx.payload())? else {
                    ctx.msg_error(&shv_proto::RpcError::invalid_param("mountedClientInfo needs a path string"))?;
                    return Ok(true);
                };
                let target_cid = state.lock().mounts.lookup(&path).map(|(_, cid, _)| cid);
                ctx.msg_result_with(move |p| {
                    match target_cid {
                        Some(cid) => p.pack_int(cid).map(|_| ()),
                        None => p.pack_null().map(|_| ()),
                    }
                })?;
            }
            "disconnectClient" => {
                let target = ctx.param()?.and_then(|v| v.as_int());
                let Some(target) = target else {
                    ctx.msg_error(&shv_proto::RpcError::invalid_param("disconnectClient needs an int cid"))?;
                    return Ok(true);
                };
                state.lock().unregister(target, now_ms());
                ctx.msg_result_void()?;
            }
            _ => {
                ctx.msg_error(&shv_proto::RpcError::method_not_found(&method))?;
            }
        }
        Ok(true)
    }

    fn handle_current_client(&mut self, ctx: &mut MsgCtx<'_>) -> io::Result<bool> {
        let method = ctx.method().unwrap_or("").to_string();
        let state = self.state.clone();
        let cid = self.cid;
        match method.as_str() {
            "subscribe" => {
                let Some((ri, ttl)) = parse_subscribe_param(ctx.payload())? else {
                    ctx.msg_error(&shv_proto::RpcError::invalid_param("subscribe needs an RI string"))?;
                    return Ok(true);
                };
                let mut guard = state.lock();
                match ttl {
                    Some(ttl_s) => guard.subscriptions.subscribe_with_ttl(cid, &ri, now_ms(), ttl_s),
                    None => guard.subscriptions.subscribe(cid, &ri),
                }
                drop(guard);
                ctx.msg_result_void()?;
            }
            "unsubscribe" => {
                let Some(ri) = parse_single_string_param(ctx.payload())? else {
                    ctx.msg_error(&shv_proto::RpcError::invalid_param("unsubscribe needs an RI string"))?;
                    return Ok(true);
                };
                state.lock().subscriptions.unsubscribe(cid, &ri);
                ctx.msg_result_void()?;
            }
            "subscriptions" => {
                let ris = state.lock().subscriptions.subscriptions_of(cid);
                ctx.msg_result_with(move |p| {
                    p.list_begin()?;
                    for ri in &ris {
                        p.pack_string(ri)?;
                    }
                    p.container_end()?;
                    Ok(())
                })?;
            }
            _ => {
                ctx.msg_error(&shv_proto::RpcError::method_not_found(&method))?;
            }
        }
        Ok(true)
    }
}

impl Stage for RpcStage {
    fn msg(&mut self, ctx: &mut MsgCtx<'_>) -> io::Result<StageResult> {
        match ctx.path() {
            ".broker" => return Ok(if self.handle_broker(ctx)? { StageResult::Done } else { StageResult::NotHandled }),
            ".broker/currentClient" => {
                return Ok(if self.handle_current_client(ctx)? { StageResult::Done } else { StageResult::NotHandled })
            }
            _ => {}
        }
        if let Some(result) = self.forward(ctx)? {
            return Ok(result);
        }
        Ok(StageResult::NotHandled)
    }

    fn ls(&mut self, ctx: &LsCtx<'_>) -> Vec<String> {
        match ctx.path {
            "" => vec![".broker".to_string()],
            ".broker" => vec!["currentClient".to_string()],
            _ => Vec::new(),
        }
    }

    fn dir(&mut self, ctx: &DirCtx<'_>) -> Vec<MethodDescriptor> {
        match ctx.path {
            ".broker" => vec![
                MethodDescriptor::new("name", Signature::VoidParam, AccessLevel::Browse),
                MethodDescriptor::new("info", Signature::VoidParam, AccessLevel::Browse),
                MethodDescriptor::new("clients", Signature::VoidParam, AccessLevel::Service),
                MethodDescriptor::new("mounts", Signature::VoidParam, AccessLevel::Service),
                MethodDescriptor::new("clientInfo", Signature::ParamRet, AccessLevel::Service),
                MethodDescriptor::new("mountedClientInfo", Signature::ParamRet, AccessLevel::Service),
                MethodDescriptor::new("disconnectClient", Signature::ParamVoid, AccessLevel::Service),
            ],
            ".broker/currentClient" => vec![
                MethodDescriptor::new("subscribe", Signature::ParamVoid, AccessLevel::Browse),
                MethodDescriptor::new("unsubscribe", Signature::ParamVoid, AccessLevel::Browse),
                MethodDescriptor::new("subscriptions", Signature::VoidParam, AccessLevel::Browse),
            ],
            _ => Vec::new(),
        }
    }

    fn idle(&mut self, _ctx: &mut IdleCtx<'_>) -> Option<u64> {
        let mut state = self.state.lock();
        state.subscriptions.expire(now_ms())
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_forward_strips_mount_prefix_and_appends_caller() {
        let mut state = BrokerState::new();
        state.broker_name = "central".to_string();
        let originator = state.allocate_cid(0);
        state.peer_mut(originator).unwrap().username = Some("alice".to_string());
        let device = state.allocate_cid(0);
        state.register_mount(device, "test/device").unwrap();

        let target = resolve_forward(&state, originator, "test/device/status", &[], None).unwrap();
        assert_eq!(target.target_cid, device);
        assert_eq!(target.relative_path, "status");
        assert_eq!(target.caller_ids, vec![originator]);
        assert_eq!(target.user_id, "alice:central");
    }

    #[test]
    fn resolve_forward_chains_previous_user_id() {
        let mut state = BrokerState::new();
        state.broker_name = "edge".to_string();
        let originator = state.allocate_cid(0);
        state.peer_mut(originator).unwrap().username = Some("bob".to_string());
        let device = state.allocate_cid(0);
        state.register_mount(device, "test/device").unwrap();

        let target = resolve_forward(&state, originator, "test/device", &[42], Some("alice:central")).unwrap();
        assert_eq!(target.caller_ids, vec![42, originator]);
        assert_eq!(target.user_id, "alice:central;bob:edge");
    }

    #[test]
    fn resolve_forward_returns_none_for_unmounted_path() {
        let state = BrokerState::new();
        assert!(resolve_forward(&state, 1, "nowhere/here", &[], None).is_none());
    }

    #[test]
    fn pop_caller_id_splits_tail_from_rest() {
        assert_eq!(pop_caller_id(&[1, 2, 3]), Some((3, vec![1, 2])));
        assert_eq!(pop_caller_id(&[]), None);
    }

    #[test]
    fn matching_recipients_excludes_peers_below_read_access() {
        let mut state = BrokerState::new();
        let reader = state.allocate_cid(0);
        state.peer_mut(reader).unwrap().access_level = AccessLevel::Read;
        let browser = state.allocate_cid(0);
        state.peer_mut(browser).unwrap().access_level = AccessLevel::Browse;
        state.subscriptions.subscribe(reader, "**:*:*");
        state.subscriptions.subscribe(browser, "**:*:*");

        let recipients = matching_recipients(&state, "a/b", "get", "chng");
        assert!(recipients.contains(&reader));
        assert!(!recipients.contains(&browser));
    }
}
