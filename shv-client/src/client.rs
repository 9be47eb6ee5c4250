use std::io;
use std::net::SocketAddr;
use std::path::Path;

use shv_chainpack::{Packer, Unpacker};
use shv_proto::{imap_key, request, request_void, ErrorCode, Meta, RequestMeta, RpcError};
use shv_transport::{NextMsg, Transport};
use shv_value::Item;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

use crate::login::{login_response, LoginOptions};

/// Outcome of a successful login: the server's assigned client id, if any.
#[derive(Debug, Clone, Default)]
pub struct LoginResult {
    pub client_id: Option<i64>,
}

/// Control operations a client can issue, routed through [`ShvClient::control`]
/// the way a single dispatch point handles them in the reference design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Disconnect,
    Reset,
    NextMsg,
    ValidMsg,
    IgnoreMsg,
    SendMsg,
    DropMsg,
}

/// The outcome of a [`ControlOp`].
#[derive(Debug)]
pub enum ControlResult {
    Next(NextMsg),
    Valid(bool),
    Sent(bool),
    Unit,
}

/// A connected SHV peer: a framing layer, request-id allocation, and the
/// login handshake. Generic over the underlying byte stream so the same
/// logic serves TCP, Unix sockets, serial ports, and in-memory test pairs.
pub struct ShvClient<S> {
    transport: Transport<S>,
    next_request_id: i64,
    last_io_error: Option<String>,
}

impl<S> ShvClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(transport: Transport<S>) -> Self {
        Self { transport, next_request_id: 1, last_io_error: None }
    }

    fn alloc_request_id(&mut self) -> i64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    pub fn errno(&self) -> Option<&str> {
        self.last_io_error.as_deref()
    }

    pub fn contrack(&self) -> bool {
        // Every framing here rides a stream whose peer shutdown we can
        // observe via a zero-length read, so "yes" unconditionally.
        true
    }

    pub async fn control(&mut self, op: ControlOp) -> io::Result<ControlResult> {
        match op {
            ControlOp::NextMsg => self.next_msg().await.map(ControlResult::Next),
            ControlOp::ValidMsg => Ok(ControlResult::Valid(self.transport.valid_msg())),
            ControlOp::IgnoreMsg => {
                self.transport.ignore_msg();
                Ok(ControlResult::Unit)
            }
            ControlOp::SendMsg => self.send_msg().await.map(ControlResult::Sent),
            ControlOp::DropMsg => self.transport.drop_msg().await.map(ControlResult::Sent),
            ControlOp::Disconnect | ControlOp::Reset => Ok(ControlResult::Unit),
        }
    }

    pub async fn next_msg(&mut self) -> io::Result<NextMsg> {
        let result = self.transport.next_msg().await;
        if let Err(e) = &result {
            self.last_io_error = Some(e.to_string());
        }
        result
    }

    pub fn payload(&self) -> &[u8] {
        self.transport.payload()
    }

    pub fn writer(&mut self) -> &mut Vec<u8> {
        self.transport.writer()
    }

    pub async fn send_msg(&mut self) -> io::Result<bool> {
        self.transport.send_msg().await
    }

    /// Packs `request(path, method)` into the transport's outbound buffer
    /// and sends it, returning the allocated `RequestId`.
    pub async fn call_void(&mut self, path: &str, method: &str) -> io::Result<i64> {
        let request_id = self.alloc_request_id();
        let buf = std::mem::take(self.transport.writer());
        let mut p = Packer::chain_pack(buf);
        request_void(&mut p, &RequestMeta { request_id, path, method, ..Default::default() })?;
        let Packer::ChainPack(w) = p else { unreachable!() };
        *self.transport.writer() = w.into_inner();
        self.transport.send_msg().await?;
        Ok(request_id)
    }

    /// Reads the next message and decodes it as a response/error/signal
    /// envelope plus raw IMap bytes for the caller to further unpack.
    pub async fn read_message(&mut self) -> io::Result<Option<(Meta, Vec<u8>)>> {
        loop {
            match self.next_msg().await? {
                NextMsg::Message => {
                    if !self.transport.valid_msg() {
                        self.transport.ignore_msg();
                        continue;
                    }
                    let payload = self.transport.payload().to_vec();
                    let mut u = Unpacker::chain_pack(&payload[..]);
                    if !matches!(u.unpack()?, Item::Meta) {
                        continue;
                    }
                    let meta = shv_proto::read_meta(&mut u, &shv_proto::Limits::default())?;
                    return Ok(Some((meta, payload)));
                }
                NextMsg::Nothing => return Ok(None),
                NextMsg::Reset => continue,
                NextMsg::Error(e) => return Err(io::Error::new(io::ErrorKind::Other, e)),
            }
        }
    }

    /// Performs the `hello`/`login` handshake described in §4.5: `hello`
    /// fetches a nonce, then `login` sends the SHA-1 response.
    pub async fn login(&mut self, opts: &LoginOptions<'_>) -> Result<LoginResult, RpcError> {
        self.call_void("", "hello")
            .await
            .map_err(|e| RpcError::new(ErrorCode::InternalErr, e.to_string()))?;
        let (_, payload) = self
            .read_message()
            .await
            .map_err(|e| RpcError::new(ErrorCode::InternalErr, e.to_string()))?
            .ok_or_else(|| RpcError::new(ErrorCode::InternalErr, "connection closed during hello"))?;

        let nonce = extract_result_string_field(&payload, "nonce")
            .map_err(|e| RpcError::new(ErrorCode::InternalErr, e.to_string()))?
            .ok_or_else(|| RpcError::new(ErrorCode::InvalidRequest, "server did not send a nonce"))?;

        let response_hash = login_response(opts, &nonce);
        let request_id = self.alloc_request_id();
        let buf = std::mem::take(self.transport.writer());
        let mut p = Packer::chain_pack(buf);
        request(&mut p, &RequestMeta { request_id, path: "", method: "login", ..Default::default() })
            .map_err(|e| RpcError::new(ErrorCode::InternalErr, e.to_string()))?;
        pack_login_param(&mut p, opts, &response_hash).map_err(|e| RpcError::new(ErrorCode::InternalErr, e.to_string()))?;
        p.container_end().map_err(|e| RpcError::new(ErrorCode::InternalErr, e.to_string()))?;
        let Packer::ChainPack(w) = p else { unreachable!() };
        *self.transport.writer() = w.into_inner();
        self.transport
            .send_msg()
            .await
            .map_err(|e| RpcError::new(ErrorCode::InternalErr, e.to_string()))?;

        let (meta, payload) = self
            .read_message()
            .await
            .map_err(|e| RpcError::new(ErrorCode::InternalErr, e.to_string()))?
            .ok_or_else(|| RpcError::new(ErrorCode::InternalErr, "connection closed during login"))?;
        if meta.request_id != Some(request_id) {
            return Err(RpcError::new(ErrorCode::InternalErr, "login response RequestId mismatch"));
        }
        let client_id = extract_result_int_field(&payload, "clientId")
            .map_err(|e| RpcError::new(ErrorCode::InternalErr, e.to_string()))?;
        Ok(LoginResult { client_id })
    }
}

impl ShvClient<TcpStream> {
    pub async fn tcp(addr: impl Into<SocketAddr>) -> io::Result<Self> {
        let stream = TcpStream::connect(addr.into()).await?;
        Ok(Self::new(Transport::block(stream)))
    }
}

impl ShvClient<UnixStream> {
    pub async fn unix(path: impl AsRef<Path>) -> io::Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::new(Transport::serial(stream)))
    }
}

impl ShvClient<tokio::io::DuplexStream> {
    /// An in-memory connected pair, for tests that want a real client on
    /// both ends without opening a socket.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (Self::new(Transport::block(a)), Self::new(Transport::block(b)))
    }

    /// Wraps a byte stream the caller already opened (e.g. a serial TTY)
    /// with serial+CRC framing, the default for TTY connections.
    pub fn serial_stream(stream: tokio::io::DuplexStream) -> Self {
        Self::new(Transport::serial_crc(stream))
    }
}

fn pack_login_param<W: std::io::Write>(p: &mut Packer<W>, opts: &LoginOptions<'_>, response_hash: &str) -> io::Result<()> {
    p.pack_int(imap_key::PARAM)?;
    p.map_begin()?;
    p.pack_string("login")?;
    p.map_begin()?;
    p.pack_string("user")?;
    p.pack_string(opts.username)?;
    p.pack_string("password")?;
    p.pack_string(response_hash)?;
    p.pack_string("type")?;
    p.pack_string("sha1")?;
    p.container_end()?;
    if opts.device_id.is_some() || opts.device_mount_point.is_some() {
        p.pack_string("options")?;
        p.map_begin()?;
        p.pack_string("device")?;
        p.map_begin()?;
        if let Some(id) = opts.device_id {
            p.pack_string("deviceId")?;
            p.pack_string(id)?;
        }
        if let Some(mp) = opts.device_mount_point {
            p.pack_string("mountPoint")?;
            p.pack_string(mp)?;
        }
        p.container_end()?;
        p.container_end()?;
    }
    p.container_end()?;
    Ok(())
}

/// Finds `Result.<field>` in a decoded response payload. Written as an
/// explicit loop rather than `for_imap`/`for_map` because those take a
/// closure that would need to re-borrow the same `Unpacker` they're
/// already iterating.
fn find_result_field(payload: &[u8], field: &str) -> io::Result<Option<Item>> {
    let mut u = Unpacker::chain_pack(payload);
    u.unpack()?; // Meta
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
        if key != Some(shv_proto::imap_key::RESULT) {
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
        loop {
            let field_key_item = u.unpack()?;
            if matches!(field_key_item, Item::ContainerEnd) {
                break;
            }
            let field_key = u.strdup(field_key_item, None)?;
            let field_value = u.unpack()?;
            if field_key == field {
                return match field_value {
                    Item::String(_) | Item::Blob(_) => {
                        let bytes = u.memdup(field_value, None)?;
                        Ok(Some(Item::String(shv_value::Chunk::whole(bytes))))
                    }
                    other => Ok(Some(other)),
                };
            } else if field_value.is_container_open() {
                u.skip(1)?;
            }
        }
        return Ok(None);
    }
}

fn extract_result_string_field(payload: &[u8], field: &str) -> io::Result<Option<String>> {
    match find_result_field(payload, field)? {
        Some(Item::String(c)) => Ok(Some(String::from_utf8(c.data).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "not utf8"))?)),
        _ => Ok(None),
    }
}

fn extract_result_int_field(payload: &[u8], field: &str) -> io::Result<Option<i64>> {
    Ok(find_result_field(payload, field)?.and_then(|v| v.as_int()))
}
