//! The per-stage interface a handler dispatches through, and the method
//! descriptor shape `ls`/`dir` callbacks hand back.

use std::io;

use bitflags::bitflags;
use shv_chainpack::Packer;
use shv_proto::{find_imap_field, imap_key, Limits, Meta};
use shv_value::{AccessLevel, Item};

use crate::send_gate::SendGate;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u32 {
        const IS_GETTER = 1 << 0;
        const IS_SETTER = 1 << 1;
        const LARGE_RESULT_HINT = 1 << 2;
        const NOT_CALLABLE = 1 << 3;
    }
}

/// Param/result shape a method advertises through `dir`, mirroring the
/// wire's `Void`/non-`Void` distinction on each side independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    VoidVoid,
    VoidParam,
    ParamVoid,
    ParamRet,
}

#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub signature: Signature,
    pub flags: MethodFlags,
    pub access: AccessLevel,
    pub description: String,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, signature: Signature, access: AccessLevel) -> Self {
        Self { name: name.into(), signature, flags: MethodFlags::empty(), access, description: String::new() }
    }
}

/// What a stage's `msg` callback decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResult {
    /// Owns the message; a reply was packed through [`MsgCtx`], or none is
    /// needed and the dispatcher should send an implicit void response.
    Done,
    /// Owns the message, but its reply will arrive out of band later (e.g.
    /// a broker forwarded the request to another peer) — the dispatcher
    /// must not send an implicit void response.
    Deferred,
    NotHandled,
}

/// Read-only view handed to `ls`/`dir`. No packer is exposed here: the
/// type signature itself is what rules out packing from these callbacks.
pub struct LsCtx<'a> {
    pub path: &'a str,
}

pub struct DirCtx<'a> {
    pub path: &'a str,
}

/// View handed to a stage's `msg` callback: the decoded envelope, the raw
/// param bytes, and `msg_result_void`/`msg_result_with`/`msg_error` for
/// packing a reply. Only response/error packing is reachable from here by
/// construction — there is no way to reach `ls`/`dir` state from a `msg`
/// callback, nor a packer that isn't already scoped to one reply shape.
pub struct MsgCtx<'a> {
    meta: &'a Meta,
    payload: &'a [u8],
    caller_ids: Vec<i64>,
    committed: Option<Vec<u8>>,
}

impl<'a> MsgCtx<'a> {
    pub(crate) fn new(meta: &'a Meta, payload: &'a [u8]) -> Self {
        // Responses carry the same `CallerIds` the request arrived with;
        // each broker hop along the way pops its own tail when forwarding.
        Self { meta, payload, caller_ids: meta.caller_ids.clone(), committed: None }
    }

    pub fn meta(&self) -> &Meta {
        self.meta
    }

    pub fn path(&self) -> &str {
        &self.meta.shv_path
    }

    pub fn method(&self) -> Option<&str> {
        self.meta.method.as_deref()
    }

    pub fn request_id(&self) -> Option<i64> {
        self.meta.request_id
    }

    /// Decodes the request's `Param` field, if any.
    pub fn param(&self) -> io::Result<Option<Item>> {
        find_imap_field(self.payload, &Limits::default(), imap_key::PARAM)
    }

    /// The raw, undecoded message bytes, for stages whose parameter shape
    /// is too deeply nested for [`MsgCtx::param`]'s shallow decode (e.g. a
    /// login stage descending into `Param.login.user`).
    pub fn payload(&self) -> &[u8] {
        self.payload
    }

    pub(crate) fn has_committed(&self) -> bool {
        self.committed.is_some()
    }

    pub(crate) fn take_committed(&mut self) -> Option<Vec<u8>> {
        self.committed.take()
    }

    /// Packs and commits a successful response carrying no result value.
    pub fn msg_result_void(&mut self) -> io::Result<()> {
        let buf = Vec::new();
        let mut p = Packer::chain_pack(buf);
        shv_proto::response_void(&mut p, self.meta.request_id.unwrap_or_default(), &self.caller_ids)?;
        self.commit(p)
    }

    /// Packs and commits a successful response, calling `write` to pack
    /// the `Result` value before closing the container.
    pub fn msg_result_with(&mut self, write: impl FnOnce(&mut Packer<Vec<u8>>) -> io::Result<()>) -> io::Result<()> {
        let buf = Vec::new();
        let mut p = Packer::chain_pack(buf);
        shv_proto::response(&mut p, self.meta.request_id.unwrap_or_default(), &self.caller_ids)?;
        p.pack_int(imap_key::RESULT)?;
        write(&mut p)?;
        p.container_end()?;
        self.commit(p)
    }

    /// Packs and commits an error response.
    pub fn msg_error(&mut self, err: &shv_proto::RpcError) -> io::Result<()> {
        let buf = Vec::new();
        let mut p = Packer::chain_pack(buf);
        shv_proto::error(&mut p, self.meta.request_id.unwrap_or_default(), &self.caller_ids, err.code, &err.message)?;
        self.commit(p)
    }

    fn commit(&mut self, p: Packer<Vec<u8>>) -> io::Result<()> {
        let Packer::ChainPack(w) = p else { unreachable!() };
        self.committed = Some(w.into_inner());
        Ok(())
    }
}

/// View handed to a stage's `idle` callback. At most one message may be
/// packed per invocation; a second attempt is refused and logged.
pub struct IdleCtx<'a> {
    send_gate: &'a SendGate,
    sent: bool,
    committed: Option<Vec<u8>>,
}

impl<'a> IdleCtx<'a> {
    pub(crate) fn new(send_gate: &'a SendGate) -> Self {
        Self { send_gate, sent: false, committed: None }
    }

    pub(crate) fn take_committed(&mut self) -> Option<Vec<u8>> {
        self.committed.take()
    }

    /// Packs and commits a signal. Returns `Ok(false)` without packing
    /// anything if this `idle` invocation already sent a message.
    pub fn emit_signal(
        &mut self,
        path: &str,
        source: &str,
        name: &str,
        access: AccessLevel,
        write: impl FnOnce(&mut Packer<Vec<u8>>) -> io::Result<()>,
    ) -> io::Result<bool> {
        if self.sent {
            tracing::warn!(path, name, "idle callback attempted a second send; dropping it");
            return Ok(false);
        }
        let _guard = self.send_gate.acquire_normal();
        let buf = Vec::new();
        let mut p = Packer::chain_pack(buf);
        shv_proto::signal(&mut p, path, source, name, access)?;
        p.pack_int(imap_key::PARAM)?;
        write(&mut p)?;
        p.container_end()?;
        let Packer::ChainPack(w) = p else { unreachable!() };
        self.committed = Some(w.into_inner());
        self.sent = true;
        Ok(true)
    }
}

/// A stage in a [`crate::Handler`]'s dispatch chain. All callbacks are
/// optional; the defaults pass every message through unhandled.
pub trait Stage: Send {
    /// Tries to own `ctx`'s message. Returning [`StageResult::Done`] stops
    /// the chain, whether or not a reply was packed (a request with no
    /// packed reply gets an implicit void response).
    fn msg(&mut self, _ctx: &mut MsgCtx<'_>) -> io::Result<StageResult> {
        Ok(StageResult::NotHandled)
    }

    /// Child node names this stage contributes at `ctx.path`.
    fn ls(&mut self, _ctx: &LsCtx<'_>) -> Vec<String> {
        Vec::new()
    }

    /// Method descriptors this stage contributes at `ctx.path`.
    fn dir(&mut self, _ctx: &DirCtx<'_>) -> Vec<MethodDescriptor> {
        Vec::new()
    }

    /// Runs periodic work. Returns the maximum number of milliseconds
    /// before this must be invoked again, or [`crate::IDLE_STOP`] to end
    /// the handler's run loop entirely.
    fn idle(&mut self, _ctx: &mut IdleCtx<'_>) -> Option<u64> {
        None
    }

    /// Invoked on a transport reset: drop any per-connection state.
    fn reset(&mut self) {}
}
