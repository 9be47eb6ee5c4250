use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::NextMsg;

pub const STX: u8 = 0xA2;
pub const ETX: u8 = 0xA3;
pub const ATX: u8 = 0xA4;
pub const ESC: u8 = 0xAA;

fn is_control(b: u8) -> bool {
    matches!(b, STX | ETX | ATX | ESC)
}

pub(crate) fn escape_into(out: &mut Vec<u8>, payload: &[u8]) {
    for &b in payload {
        if is_control(b) {
            out.push(ESC);
            out.push(b & 0x0F);
        } else {
            out.push(b);
        }
    }
}

/// Byte-stuffed framing: `STX payload ETX`, where any control byte
/// (`STX`/`ETX`/`ATX`/`ESC`) occurring in the payload is replaced by
/// `ESC, control & 0x0F`. `ATX` aborts the frame currently being read
/// in-band without dropping the connection.
///
/// This is the default framing for Unix domain sockets.
pub struct SerialFraming {
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    valid: bool,
}

impl Default for SerialFraming {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialFraming {
    pub fn new() -> Self {
        Self { inbound: Vec::new(), outbound: Vec::new(), valid: false }
    }

    /// Reads a raw (still-escaped) frame body, i.e. everything between
    /// `STX` and `ETX`/`ATX`. `Ok(None)` on clean EOF before any `STX`.
    pub(crate) async fn read_raw_frame<S: AsyncRead + Unpin + Send>(stream: &mut S) -> io::Result<Option<FrameBody>> {
        // Skip garbage bytes until STX.
        loop {
            let mut b = [0u8; 1];
            let n = stream.read(&mut b).await?;
            if n == 0 {
                return Ok(None);
            }
            if b[0] == STX {
                break;
            }
        }
        let mut raw = Vec::new();
        loop {
            let mut b = [0u8; 1];
            let n = stream.read(&mut b).await?;
            if n == 0 {
                return Ok(Some(FrameBody { raw, aborted: true }));
            }
            match b[0] {
                ETX => return Ok(Some(FrameBody { raw, aborted: false })),
                ATX => return Ok(Some(FrameBody { raw, aborted: true })),
                other => raw.push(other),
            }
        }
    }

    pub(crate) fn unescape(raw: &[u8]) -> Result<Vec<u8>, ()> {
        let mut out = Vec::with_capacity(raw.len());
        let mut iter = raw.iter().copied();
        while let Some(b) = iter.next() {
            if b == ESC {
                let nibble = iter.next().ok_or(())?;
                let restored = match nibble {
                    n if n == (STX & 0x0F) => STX,
                    n if n == (ETX & 0x0F) => ETX,
                    n if n == (ATX & 0x0F) => ATX,
                    n if n == (ESC & 0x0F) => ESC,
                    _ => return Err(()),
                };
                out.push(restored);
            } else {
                out.push(b);
            }
        }
        Ok(out)
    }

    pub async fn next_msg<S: AsyncRead + Unpin + Send>(&mut self, stream: &mut S) -> io::Result<NextMsg> {
        let Some(body) = Self::read_raw_frame(stream).await? else {
            return Ok(NextMsg::Nothing);
        };
        if body.aborted {
            self.valid = false;
            self.inbound.clear();
            return Ok(NextMsg::Nothing);
        }
        match Self::unescape(&body.raw) {
            Ok(data) => {
                self.inbound = data;
                self.valid = true;
                Ok(NextMsg::Message)
            }
            Err(()) => {
                self.valid = false;
                self.inbound.clear();
                Ok(NextMsg::Nothing)
            }
        }
    }

    pub fn valid_msg(&mut self) -> bool {
        self.valid
    }

    pub fn ignore_msg(&mut self) {
        self.inbound.clear();
    }

    pub fn payload(&self) -> &[u8] {
        &self.inbound
    }

    pub(crate) fn set_inbound(&mut self, data: Vec<u8>) {
        self.inbound = data;
    }

    pub fn writer(&mut self) -> &mut Vec<u8> {
        &mut self.outbound
    }

    pub async fn send_msg<S: AsyncWrite + Unpin + Send>(&mut self, stream: &mut S) -> io::Result<bool> {
        let mut framed = Vec::with_capacity(self.outbound.len() + 2);
        framed.push(STX);
        escape_into(&mut framed, &self.outbound);
        framed.push(ETX);
        self.outbound.clear();
        stream.write_all(&framed).await?;
        stream.flush().await?;
        Ok(true)
    }

    pub async fn drop_msg<S: AsyncWrite + Unpin + Send>(&mut self, _stream: &mut S) -> io::Result<bool> {
        self.outbound.clear();
        Ok(true)
    }
}

pub(crate) struct FrameBody {
    pub raw: Vec<u8>,
    pub aborted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn control_bytes_roundtrip_through_escaping() {
        let (mut a, mut b) = duplex(4096);
        let mut writer = SerialFraming::new();
        writer.writer().extend_from_slice(&[STX, ETX, ATX, ESC]);
        writer.send_msg(&mut a).await.unwrap();
        drop(a);

        let mut reader = SerialFraming::new();
        assert!(matches!(reader.next_msg(&mut b).await.unwrap(), NextMsg::Message));
        assert!(reader.valid_msg());
        assert_eq!(reader.payload(), &[STX, ETX, ATX, ESC]);
    }

    #[tokio::test]
    async fn garbage_before_stx_is_ignored() {
        let (mut a, mut b) = duplex(4096);
        a.write_all(&[0x00, 0x01, 0x02]).await.unwrap();
        let mut writer = SerialFraming::new();
        writer.writer().extend_from_slice(b"hi");
        writer.send_msg(&mut a).await.unwrap();
        drop(a);

        let mut reader = SerialFraming::new();
        assert!(matches!(reader.next_msg(&mut b).await.unwrap(), NextMsg::Message));
        assert_eq!(reader.payload(), b"hi");
    }

    #[tokio::test]
    async fn atx_aborts_without_killing_connection() {
        let (mut a, mut b) = duplex(4096);
        a.write_all(&[STX, 1, 2, ATX]).await.unwrap();
        let mut writer = SerialFraming::new();
        writer.writer().extend_from_slice(b"next");
        writer.send_msg(&mut a).await.unwrap();
        drop(a);

        let mut reader = SerialFraming::new();
        assert!(matches!(reader.next_msg(&mut b).await.unwrap(), NextMsg::Nothing));
        assert!(!reader.valid_msg());
        assert!(matches!(reader.next_msg(&mut b).await.unwrap(), NextMsg::Message));
        assert_eq!(reader.payload(), b"next");
    }
}
