//! The login stage: the first stage in a peer's dispatch chain, handling
//! the `hello`/`login` handshake and recording the resulting role.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use sha1::{Digest, Sha1};
use shv_chainpack::Unpacker;
use shv_handler::{DirCtx, IdleCtx, LsCtx, MethodDescriptor, MsgCtx, Signature, Stage, StageResult};
use shv_proto::{ErrorCode, RpcError};
use shv_value::{AccessLevel, Item};

use crate::state::BrokerState;

const NONCE_LEN: usize = 10;
const NONCE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn random_nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..NONCE_LEN).map(|_| NONCE_ALPHABET[rng.gen_range(0..NONCE_ALPHABET.len())] as char).collect()
}

fn sha1_hex(bytes: &[u8]) -> String {
    let digest = Sha1::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        write!(out, "{byte:02x}").unwrap();
    }
    out
}

/// The decoded `login` request parameter:
/// `{"login": {"user", "password", "type"}, "options": {"device": {"deviceId", "mountPoint"}}}`.
#[derive(Debug, Clone, Default)]
struct LoginParam {
    user: String,
    password_response: String,
    device_id: Option<String>,
    mount_point: Option<String>,
}

fn parse_login_param(payload: &[u8]) -> io::Result<Option<LoginParam>> {
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
        if !matches!(value, Item::Map) {
            if value.is_container_open() {
                u.skip(1)?;
            }
            return Ok(None);
        }
        let mut out = LoginParam::default();
        loop {
            let top_key_item = u.unpack()?;
            if matches!(top_key_item, Item::ContainerEnd) {
                return Ok(Some(out));
            }
            let top_key = u.strdup(top_key_item, None)?;
            let top_value = u.unpack()?;
            match top_key.as_str() {
                "login" if matches!(top_value, Item::Map) => loop {
                    let k = u.unpack()?;
                    if matches!(k, Item::ContainerEnd) {
                        break;
                    }
                    let name = u.strdup(k, None)?;
                    let v = u.unpack()?;
                    match name.as_str() {
                        "user" => out.user = u.strdup(v, None)?,
                        "password" => out.password_response = u.strdup(v, None)?,
                        _ => {
                            if v.is_container_open() {
                                u.skip(1)?;
                            }
                        }
                    }
                },
                "options" if matches!(top_value, Item::Map) => loop {
                    let k = u.unpack()?;
                    if matches!(k, Item::ContainerEnd) {
                        break;
                    }
                    let name = u.strdup(k, None)?;
                    let v = u.unpack()?;
                    if name == "device" && matches!(v, Item::Map) {
                        loop {
                            let dk = u.unpack()?;
                            if matches!(dk, Item::ContainerEnd) {
                                break;
                            }
                            let dname = u.strdup(dk, None)?;
                            let dv = u.unpack()?;
                            match dname.as_str() {
                                "deviceId" => out.device_id = Some(u.strdup(dv, None)?),
                                "mountPoint" => out.mount_point = Some(u.strdup(dv, None)?),
                                _ => {
                                    if dv.is_container_open() {
                                        u.skip(1)?;
                                    }
                                }
                            }
                        }
                    } else if v.is_container_open() {
                        u.skip(1)?;
                    }
                },
                _ => {
                    if top_value.is_container_open() {
                        u.skip(1)?;
                    }
                }
            }
        }
    }
}

/// A login attempt, as handed to a [`LoginCallback`].
#[derive(Debug, Clone)]
pub struct LoginAttempt<'a> {
    pub username: &'a str,
    /// `sha1(password_or_sha1_digest ++ nonce)`, lower-hex, exactly what
    /// arrived on the wire.
    pub password_response: &'a str,
    pub nonce: &'a str,
    pub device_id: Option<&'a str>,
}

/// Validates credentials and maps them to a role name, or a human-readable
/// failure.
pub trait LoginCallback: Send + Sync {
    fn login(&self, attempt: &LoginAttempt<'_>) -> Result<String, String>;
}

impl<F> LoginCallback for F
where
    F: Fn(&LoginAttempt<'_>) -> Result<String, String> + Send + Sync,
{
    fn login(&self, attempt: &LoginAttempt<'_>) -> Result<String, String> {
        self(attempt)
    }
}

/// A [`LoginCallback`] that checks a fixed user table, hashing each
/// configured password with the peer's nonce exactly as the wire does.
pub struct TableLoginCallback {
    users: Vec<(String, String, String)>, // (user, sha1(password), role)
}

impl TableLoginCallback {
    pub fn new() -> Self {
        Self { users: Vec::new() }
    }

    pub fn add_user(mut self, username: impl Into<String>, password: &str, role: impl Into<String>) -> Self {
        self.users.push((username.into(), sha1_hex(password.as_bytes()), role.into()));
        self
    }
}

impl Default for TableLoginCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginCallback for TableLoginCallback {
    fn login(&self, attempt: &LoginAttempt<'_>) -> Result<String, String> {
        for (user, password_sha1, role) in &self.users {
            if user == attempt.username {
                let expected = sha1_hex(format!("{password_sha1}{}", attempt.nonce).as_bytes());
                if expected == attempt.password_response {
                    return Ok(role.clone());
                }
                return Err("invalid login credentials".to_string());
            }
        }
        Err(format!("unknown user: {}", attempt.username))
    }
}

pub struct LoginStage {
    cid: i64,
    state: Arc<Mutex<BrokerState>>,
    callback: Arc<dyn LoginCallback>,
    nonce: Option<String>,
}

impl LoginStage {
    pub fn new(cid: i64, state: Arc<Mutex<BrokerState>>, callback: Arc<dyn LoginCallback>) -> Self {
        Self { cid, state, callback, nonce: None }
    }
}

impl Stage for LoginStage {
    fn msg(&mut self, ctx: &mut MsgCtx<'_>) -> io::Result<StageResult> {
        if !ctx.path().is_empty() {
            return Ok(StageResult::NotHandled);
        }
        match ctx.method() {
            Some("hello") => {
                let nonce = random_nonce();
                self.nonce = Some(nonce.clone());
                ctx.msg_result_with(move |p| {
                    p.map_begin()?;
                    p.pack_string("nonce")?;
                    p.pack_string(&nonce)?;
                    p.container_end()?;
                    Ok(())
                })?;
                Ok(StageResult::Done)
            }
            Some("login") => {
                let Some(nonce) = self.nonce.clone() else {
                    ctx.msg_error(&RpcError::new(ErrorCode::InvalidRequest, "login without hello"))?;
                    return Ok(StageResult::Done);
                };
                let Some(param) = parse_login_param(ctx.payload())? else {
                    ctx.msg_error(&RpcError::invalid_param("malformed login param"))?;
                    return Ok(StageResult::Done);
                };
                let attempt =
                    LoginAttempt { username: &param.user, password_response: &param.password_response, nonce: &nonce, device_id: param.device_id.as_deref() };
                match self.callback.login(&attempt) {
                    Ok(role_name) => {
                        let mut state = self.state.lock();
                        let role = state.role(&role_name).cloned();
                        if let Some(peer) = state.peer_mut(self.cid) {
                            peer.role = Some(role_name.clone());
                            peer.username = Some(param.user.clone());
                        }
                        if let Some(role) = &role {
                            if let Some(mount_point) = &param.mount_point {
                                if role.allows_mount(mount_point) {
                                    let _ = state.register_mount(self.cid, mount_point);
                                }
                            }
                            for ri in role.initial_subscriptions.clone() {
                                state.subscriptions.subscribe(self.cid, &ri);
                            }
                        }
                        drop(state);
                        let cid = self.cid;
                        ctx.msg_result_with(move |p| {
                            p.map_begin()?;
                            p.pack_string("clientId")?;
                            p.pack_int(cid)?;
                            p.container_end()?;
                            Ok(())
                        })?;
                    }
                    Err(message) => {
                        ctx.msg_error(&RpcError::new(ErrorCode::InvalidRequest, message))?;
                    }
                }
                Ok(StageResult::Done)
            }
            _ => Ok(StageResult::NotHandled),
        }
    }

    fn ls(&mut self, _ctx: &LsCtx<'_>) -> Vec<String> {
        Vec::new()
    }

    fn dir(&mut self, ctx: &DirCtx<'_>) -> Vec<MethodDescriptor> {
        if ctx.path.is_empty() {
            vec![
                MethodDescriptor::new("hello", Signature::VoidParam, AccessLevel::Browse),
                MethodDescriptor::new("login", Signature::ParamRet, AccessLevel::Browse),
            ]
        } else {
            Vec::new()
        }
    }

    fn idle(&mut self, _ctx: &mut IdleCtx<'_>) -> Option<u64> {
        None
    }

    fn reset(&mut self) {
        self.nonce = None;
        let mut state = self.state.lock();
        if let Some(peer) = state.peer_mut(self.cid) {
            peer.role = None;
            peer.username = None;
        }
        state.subscriptions.unsubscribe_all(self.cid);
    }
}
