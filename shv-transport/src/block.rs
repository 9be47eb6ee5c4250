use std::io;

use shv_chainpack::varint_uint::{read_uint, write_uint};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::NextMsg;

const PROTO_RESET: u8 = 0;
const PROTO_CHAIN_PACK: u8 = 1;

/// Length-prefixed framing: a ChainPack `UInt` payload length (counting the
/// protocol-id byte), a one-byte protocol identifier, then `length - 1`
/// payload bytes. No in-band abort: a half-written frame leaves the
/// connection unrecoverable once a partial-send timeout elapses.
///
/// This is the default framing for TCP connections.
pub struct BlockFraming {
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    reset_seen: bool,
}

impl Default for BlockFraming {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockFraming {
    pub fn new() -> Self {
        Self { inbound: Vec::new(), outbound: Vec::new(), reset_seen: false }
    }

    pub async fn next_msg<S: AsyncRead + Unpin + Send>(&mut self, stream: &mut S) -> io::Result<NextMsg> {
        let len = match read_uint_async(stream).await {
            Ok(Some(len)) => len,
            Ok(None) => return Ok(NextMsg::Nothing),
            Err(e) => return Ok(NextMsg::Error(e.to_string())),
        };
        if len == 0 {
            return Ok(NextMsg::Error("zero-length block frame".to_string()));
        }
        let mut proto = [0u8; 1];
        stream.read_exact(&mut proto).await?;
        let payload_len = (len - 1) as usize;
        let mut buf = vec![0u8; payload_len];
        stream.read_exact(&mut buf).await?;
        match proto[0] {
            PROTO_RESET => {
                self.reset_seen = true;
                Ok(NextMsg::Reset)
            }
            PROTO_CHAIN_PACK => {
                self.inbound = buf;
                Ok(NextMsg::Message)
            }
            _ => Ok(NextMsg::Nothing),
        }
    }

    pub fn valid_msg(&mut self) -> bool {
        true
    }

    pub fn ignore_msg(&mut self) {
        self.inbound.clear();
    }

    pub fn payload(&self) -> &[u8] {
        &self.inbound
    }

    pub fn writer(&mut self) -> &mut Vec<u8> {
        &mut self.outbound
    }

    pub async fn send_msg<S: AsyncWrite + Unpin + Send>(&mut self, stream: &mut S) -> io::Result<bool> {
        let mut framed = Vec::with_capacity(self.outbound.len() + 5);
        write_uint(&mut framed, self.outbound.len() as u64 + 1)?;
        framed.push(PROTO_CHAIN_PACK);
        framed.extend_from_slice(&self.outbound);
        self.outbound.clear();
        stream.write_all(&framed).await?;
        stream.flush().await?;
        Ok(true)
    }

    pub async fn drop_msg<S: AsyncWrite + Unpin + Send>(&mut self, _stream: &mut S) -> io::Result<bool> {
        self.outbound.clear();
        Ok(true)
    }

    pub async fn send_reset<S: AsyncWrite + Unpin + Send>(&mut self, stream: &mut S) -> io::Result<()> {
        let mut framed = Vec::new();
        write_uint(&mut framed, 1)?;
        framed.push(PROTO_RESET);
        stream.write_all(&framed).await?;
        stream.flush().await
    }
}

/// Reads a ChainPack UInt varint from an async stream, byte by byte (the
/// length prefix is small, so this is not a throughput concern). Returns
/// `Ok(None)` on a clean EOF before any byte was read.
async fn read_uint_async<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<Option<u64>> {
    let mut first = [0u8; 1];
    let n = stream.read(&mut first).await?;
    if n == 0 {
        return Ok(None);
    }
    let extra = varint_extra_bytes(first[0]);
    let mut buf = vec![first[0]];
    buf.resize(1 + extra, 0);
    if extra > 0 {
        stream.read_exact(&mut buf[1..]).await?;
    }
    let mut cursor = &buf[..];
    Ok(Some(read_uint(&mut cursor)?))
}

fn varint_extra_bytes(b0: u8) -> usize {
    if b0 & 0x80 == 0 {
        0
    } else if b0 & 0xc0 == 0x80 {
        1
    } else if b0 & 0xe0 == 0xc0 {
        2
    } else if b0 & 0xf0 == 0xe0 {
        3
    } else {
        (b0 & 0x0f) as usize + 5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn two_messages_then_nothing() {
        let (mut a, mut b) = duplex(4096);
        let mut writer = BlockFraming::new();
        writer.writer().extend_from_slice(&[1, 2, 3]);
        writer.send_msg(&mut a).await.unwrap();
        writer.writer().extend_from_slice(&[4, 5]);
        writer.send_msg(&mut a).await.unwrap();
        drop(a);

        let mut reader = BlockFraming::new();
        assert!(matches!(reader.next_msg(&mut b).await.unwrap(), NextMsg::Message));
        assert!(reader.valid_msg());
        assert_eq!(reader.payload(), &[1, 2, 3]);

        assert!(matches!(reader.next_msg(&mut b).await.unwrap(), NextMsg::Message));
        assert_eq!(reader.payload(), &[4, 5]);

        assert!(matches!(reader.next_msg(&mut b).await.unwrap(), NextMsg::Nothing));
    }

    #[tokio::test]
    async fn reset_frame_is_reported() {
        let (mut a, mut b) = duplex(64);
        let mut writer = BlockFraming::new();
        writer.send_reset(&mut a).await.unwrap();

        let mut reader = BlockFraming::new();
        assert!(matches!(reader.next_msg(&mut b).await.unwrap(), NextMsg::Reset));
    }
}
