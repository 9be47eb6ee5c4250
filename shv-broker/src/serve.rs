//! Drives one peer's connection end to end: builds the login/access/rpc
//! stage chain, runs the [`Handler`] loop, and routes everything that
//! comes back as [`Tick::Passthrough`] — a response/error popping its way
//! back to its originator, or a signal fanning out to its subscribers —
//! through the broker's [`PeerRegistry`].

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use shv_chainpack::{Multipack, Packer};
use shv_client::ShvClient;
use shv_handler::{Handler, Stage, Tick};
use shv_proto::{Kind, Limits, Meta};
use shv_value::{AccessLevel, Item};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::access::AccessStage;
use crate::login::LoginCallback;
use crate::login::LoginStage;
use crate::registry::PeerRegistry;
use crate::rpc::{now_ms, pop_caller_id, RpcStage};
use crate::state::BrokerState;

/// A [`std::io::Write`] sink that buffers into memory and, once finished,
/// hands the accumulated bytes to a peer's registry channel as one
/// complete message.
struct Outbox {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    buf: Vec<u8>,
}

impl Outbox {
    fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { tx, buf: Vec::new() }
    }

    fn finish(self) {
        let _ = self.tx.send(self.buf);
    }
}

impl Write for Outbox {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Drives `client`'s side of one already-registered connection (`cid`)
/// until it closes. Runs the standard login/access/rpc stage chain and
/// routes passthrough responses and signals via `registry`.
pub async fn serve_connection<S>(
    client: ShvClient<S>,
    cid: i64,
    state: Arc<Mutex<BrokerState>>,
    registry: PeerRegistry,
    login_callback: Arc<dyn LoginCallback>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut outbox = registry.register(cid);
    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(LoginStage::new(cid, state.clone(), login_callback)),
        Box::new(AccessStage::new(cid, state.clone())),
        Box::new(RpcStage::new(cid, state.clone(), registry.clone())),
    ];
    let mut handler = Handler::new(client, stages);

    let result = loop {
        tokio::select! {
            tick = handler.run_once() => {
                match tick {
                    Ok(Tick::Dispatched) => {}
                    Ok(Tick::Closed) => break Ok(()),
                    Ok(Tick::Passthrough(meta, payload)) => {
                        if let Err(e) = route_passthrough(&state, &registry, cid, &meta, &payload) {
                            tracing::warn!(cid, error = %e, "dropping an unroutable passthrough message");
                        }
                    }
                    Err(e) => break Err(e),
                }
            }
            bytes = outbox.recv() => {
                let Some(bytes) = bytes else { break Ok(()) };
                *handler.client_mut().writer() = bytes;
                handler.client_mut().send_msg().await?;
            }
        }
    };

    registry.unregister(cid);
    state.lock().unregister(cid, now_ms());
    result
}

fn route_passthrough(state: &Arc<Mutex<BrokerState>>, registry: &PeerRegistry, source_cid: i64, meta: &Meta, payload: &[u8]) -> io::Result<()> {
    let imap_has_error = shv_proto::find_imap_field(payload, &Limits::default(), shv_proto::imap_key::ERROR)?.is_some();
    match meta.kind(imap_has_error) {
        Kind::Response | Kind::Error => route_response(registry, meta, payload),
        Kind::Signal => route_signal(state, registry, source_cid, meta, payload),
        Kind::Request => Ok(()), // run_once never yields Passthrough for a request
    }
}

/// Pops `meta`'s `CallerIds` tail and forwards the original `Result`/`Error`
/// content untouched to whoever is one hop closer to the original caller.
fn route_response(registry: &PeerRegistry, meta: &Meta, payload: &[u8]) -> io::Result<()> {
    let Some((next_hop, rest_caller_ids)) = pop_caller_id(&meta.caller_ids) else {
        return Ok(()); // no return path recorded; nothing to route
    };
    let (_, content) = shv_proto::split_meta(payload, &Limits::default())?;
    let mut p = Packer::chain_pack(Vec::new());
    shv_proto::response_meta_only(&mut p, meta.request_id.unwrap_or_default(), &rest_caller_ids)?;
    let Packer::ChainPack(w) = p else { unreachable!() };
    let mut bytes = w.into_inner();
    bytes.extend_from_slice(content);
    registry.send_to(next_hop, bytes);
    Ok(())
}

/// Prefixes `source_cid`'s mount point onto a signal it emitted and fans
/// the (re-packed) message out to every subscriber live in `registry`,
/// packing it through one [`Multipack`] so a dead recipient doesn't stop
/// the others from receiving it.
fn route_signal(state: &Arc<Mutex<BrokerState>>, registry: &PeerRegistry, source_cid: i64, meta: &Meta, payload: &[u8]) -> io::Result<()> {
    let guard = state.lock();
    let mount_path = guard.mounts.path_of(source_cid).unwrap_or("").to_string();
    let full_path = match (mount_path.as_str(), meta.shv_path.as_str()) {
        ("", p) => p.to_string(),
        (m, "") => m.to_string(),
        (m, p) => format!("{m}/{p}"),
    };
    let source = meta.source_or_default().to_string();
    let name = meta.signal_or_default().to_string();
    let access = meta.access_level.unwrap_or(AccessLevel::Read);
    let recipients = crate::rpc::matching_recipients(&guard, &full_path, &source, &name);
    drop(guard);
    if recipients.is_empty() {
        return Ok(());
    }

    let (_, content) = shv_proto::split_meta(payload, &Limits::default())?;
    let mut multi = Multipack::new();
    for recipient in &recipients {
        if let Some(tx) = registry.sender(*recipient) {
            multi.add(*recipient as usize, Packer::chain_pack(Outbox::new(tx)));
        }
    }
    if multi.recipient_ids().next().is_none() {
        return Ok(());
    }

    multi.pack(&Item::Meta);
    multi.pack(&Item::Int(shv_proto::tag::META_TYPE_ID));
    multi.pack(&Item::Int(shv_proto::MESSAGE_TYPE_ID));
    if !full_path.is_empty() {
        multi.pack(&Item::Int(shv_proto::tag::SHV_PATH));
        multi.pack(&Item::String(shv_value::Chunk::whole(full_path.as_bytes().to_vec())));
    }
    multi.pack(&Item::Int(shv_proto::tag::METHOD));
    multi.pack(&Item::String(shv_value::Chunk::whole(name.as_bytes().to_vec())));
    if source != "get" {
        multi.pack(&Item::Int(shv_proto::tag::SOURCE));
        multi.pack(&Item::String(shv_value::Chunk::whole(source.as_bytes().to_vec())));
    }
    if access != AccessLevel::Read {
        multi.pack(&Item::Int(shv_proto::tag::ACCESS_LEVEL));
        multi.pack(&Item::Int(access as i64));
    }
    multi.pack(&Item::ContainerEnd);

    for (_, mut outbox) in multi.into_writers() {
        outbox.write_all(content).ok();
        outbox.finish();
    }
    Ok(())
}
