//! The multi-stage dispatcher bound to a client connection: one reader
//! loop that tries each stage's `msg` in order, falls back to aggregated
//! `ls`/`dir`, and drives idle callbacks on a min-sleep schedule.

use std::io;
use std::time::Duration;

use shv_client::ShvClient;
use shv_proto::{ErrorCode, RpcError};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::introspect::{dir_result, ls_result};
use crate::send_gate::SendGate;
use crate::stage::{IdleCtx, MsgCtx, Stage, StageResult};

/// Returned by an `idle` callback to end the handler's run loop.
pub const IDLE_STOP: u64 = u64::MAX;

/// Default wait between idle ticks when no stage expresses an opinion.
const DEFAULT_IDLE_MS: u64 = 60_000;

/// One iteration of [`Handler::run_once`] or [`Handler::idle_tick`].
#[derive(Debug)]
pub enum Tick {
    /// A request was dispatched (and answered, or a `MethodNotFound` sent).
    Dispatched,
    /// A response, error, or signal arrived that isn't this handler's to
    /// answer; the caller (e.g. a broker's forwarding logic) gets it raw.
    Passthrough(shv_proto::Meta, Vec<u8>),
    /// The peer closed the connection.
    Closed,
}

pub struct Handler<S> {
    client: ShvClient<S>,
    stages: Vec<Box<dyn Stage>>,
    send_gate: SendGate,
}

impl<S> Handler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(client: ShvClient<S>, stages: Vec<Box<dyn Stage>>) -> Self {
        Self { client, stages, send_gate: SendGate::new() }
    }

    pub fn client(&self) -> &ShvClient<S> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut ShvClient<S> {
        &mut self.client
    }

    /// Reads and dispatches exactly one incoming message.
    pub async fn run_once(&mut self) -> io::Result<Tick> {
        let Some((meta, payload)) = self.client.read_message().await? else {
            return Ok(Tick::Closed);
        };

        let imap_has_error = shv_proto::find_imap_field(&payload, &shv_proto::Limits::default(), shv_proto::imap_key::ERROR)?.is_some();
        if !matches!(meta.kind(imap_has_error), shv_proto::Kind::Request) {
            return Ok(Tick::Passthrough(meta, payload));
        }

        let method = meta.method.clone();
        let path = meta.shv_path.clone();
        let mut ctx = MsgCtx::new(&meta, &payload);
        let mut result = StageResult::NotHandled;
        for stage in &mut self.stages {
            result = stage.msg(&mut ctx)?;
            if result != StageResult::NotHandled {
                break;
            }
        }

        match result {
            StageResult::NotHandled => match method.as_deref() {
                Some("ls") => self.builtin_ls(&mut ctx, &path)?,
                Some("dir") => self.builtin_dir(&mut ctx, &path)?,
                _ => {
                    let err = RpcError::new(ErrorCode::MethodNotFound, format!("no such method: {path}:{}", method.unwrap_or_default()));
                    ctx.msg_error(&err)?;
                }
            },
            StageResult::Done if !ctx.has_committed() => ctx.msg_result_void()?,
            StageResult::Done | StageResult::Deferred => {}
        }

        if let Some(bytes) = ctx.take_committed() {
            self.send_bytes(bytes).await?;
        }
        Ok(Tick::Dispatched)
    }

    fn builtin_ls(&mut self, ctx: &mut MsgCtx<'_>, path: &str) -> io::Result<()> {
        let names = ls_result(&mut self.stages, path);
        ctx.msg_result_with(|p| {
            p.list_begin()?;
            for name in &names {
                p.pack_string(name)?;
            }
            p.container_end()?;
            Ok(())
        })
    }

    fn builtin_dir(&mut self, ctx: &mut MsgCtx<'_>, path: &str) -> io::Result<()> {
        let methods = dir_result(&mut self.stages, path);
        ctx.msg_result_with(|p| {
            p.list_begin()?;
            for m in &methods {
                p.map_begin()?;
                p.pack_string("name")?;
                p.pack_string(&m.name)?;
                p.pack_string("accessGrant")?;
                p.pack_string(&m.access.to_string())?;
                p.container_end()?;
            }
            p.container_end()?;
            Ok(())
        })
    }

    async fn send_bytes(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        let _guard = self.send_gate.acquire_priority();
        *self.client.writer() = bytes;
        self.client.send_msg().await?;
        Ok(())
    }

    /// Runs one idle tick across every stage, sending at most one packed
    /// message per stage, and returns the minimum requested delay, or
    /// `None` if a stage asked to stop the run loop.
    pub async fn idle_tick(&mut self) -> io::Result<Option<Duration>> {
        let mut min_ms = DEFAULT_IDLE_MS;
        let mut pending = Vec::new();
        for stage in &mut self.stages {
            let mut ctx = IdleCtx::new(&self.send_gate);
            let requested = stage.idle(&mut ctx);
            if let Some(bytes) = ctx.take_committed() {
                pending.push(bytes);
            }
            match requested {
                Some(IDLE_STOP) => return Ok(None),
                Some(ms) => min_ms = min_ms.min(ms),
                None => {}
            }
        }
        for bytes in pending {
            self.send_bytes(bytes).await?;
        }
        Ok(Some(Duration::from_millis(min_ms)))
    }

    /// Drives the reader loop and idle ticks together until the peer
    /// closes or a stage's idle callback asks to stop.
    pub async fn run(&mut self) -> io::Result<()> {
        loop {
            let sleep = self.idle_tick().await?;
            let Some(sleep) = sleep else {
                return Ok(());
            };
            tokio::select! {
                tick = self.run_once() => {
                    if matches!(tick?, Tick::Closed) {
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }

    pub fn reset_stages(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{DirCtx, LsCtx};

    struct PingStage;

    impl Stage for PingStage {
        fn msg(&mut self, ctx: &mut MsgCtx<'_>) -> io::Result<StageResult> {
            if ctx.path().is_empty() && ctx.method() == Some("ping") {
                ctx.msg_result_void()?;
                return Ok(StageResult::Done);
            }
            Ok(StageResult::NotHandled)
        }

        fn ls(&mut self, _ctx: &LsCtx<'_>) -> Vec<String> {
            vec!["child".to_string()]
        }

        fn dir(&mut self, _ctx: &DirCtx<'_>) -> Vec<crate::stage::MethodDescriptor> {
            vec![crate::stage::MethodDescriptor::new("ping", crate::stage::Signature::VoidVoid, shv_value::AccessLevel::Browse)]
        }
    }

    #[tokio::test]
    async fn claimed_request_gets_a_response() {
        let (mut caller, callee) = ShvClient::pair();
        let mut handler = Handler::new(callee, vec![Box::new(PingStage)]);

        let request_id = caller.call_void("", "ping").await.unwrap();
        assert!(matches!(handler.run_once().await.unwrap(), Tick::Dispatched));

        let (meta, _) = caller.read_message().await.unwrap().unwrap();
        assert_eq!(meta.request_id, Some(request_id));
    }

    #[tokio::test]
    async fn unclaimed_request_gets_method_not_found() {
        let (mut caller, callee) = ShvClient::pair();
        let mut handler = Handler::new(callee, vec![Box::new(PingStage)]);

        caller.call_void("", "bogus").await.unwrap();
        handler.run_once().await.unwrap();

        let (_, payload) = caller.read_message().await.unwrap().unwrap();
        let err = shv_proto::find_imap_field(&payload, &shv_proto::Limits::default(), shv_proto::imap_key::ERROR)
            .unwrap()
            .expect("error field present");
        match err {
            shv_value::Item::IMap => {}
            other => panic!("unexpected error field shape: {other:?}"),
        }
    }

    #[tokio::test]
    async fn ls_falls_back_to_stage_aggregation() {
        let (mut caller, callee) = ShvClient::pair();
        let mut handler = Handler::new(callee, vec![Box::new(PingStage)]);

        caller.call_void("", "ls").await.unwrap();
        handler.run_once().await.unwrap();

        let (_, payload) = caller.read_message().await.unwrap().unwrap();
        let result = shv_proto::find_imap_field(&payload, &shv_proto::Limits::default(), shv_proto::imap_key::RESULT)
            .unwrap()
            .expect("result field present");
        assert!(matches!(result, shv_value::Item::List));
    }
}
