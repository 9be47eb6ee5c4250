use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::crc32::crc32;
use crate::serial::SerialFraming;
use crate::NextMsg;

/// Serial framing with a trailing big-endian CRC-32 of the unescaped payload,
/// itself escaped by the same `STX`/`ETX`/`ATX`/`ESC` rule as the payload.
/// A single flipped payload byte fails [`SerialCrcFraming::valid_msg`]
/// without aborting the connection, which plain [`SerialFraming`] can't
/// detect on its own.
pub struct SerialCrcFraming {
    inner: SerialFraming,
    valid: bool,
}

impl Default for SerialCrcFraming {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialCrcFraming {
    pub fn new() -> Self {
        Self { inner: SerialFraming::new(), valid: false }
    }

    pub async fn next_msg<S: AsyncRead + Unpin + Send>(&mut self, stream: &mut S) -> io::Result<NextMsg> {
        let Some(body) = SerialFraming::read_raw_frame(stream).await? else {
            return Ok(NextMsg::Nothing);
        };
        if body.aborted {
            self.valid = false;
            return Ok(NextMsg::Nothing);
        }
        let Ok(data) = SerialFraming::unescape(&body.raw) else {
            self.valid = false;
            return Ok(NextMsg::Nothing);
        };
        if data.len() < 4 {
            self.valid = false;
            return Ok(NextMsg::Nothing);
        }
        let split = data.len() - 4;
        let (payload, crc_bytes) = data.split_at(split);
        let expected = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        self.valid = crc32(payload) == expected;
        self.inner.set_inbound(payload.to_vec());
        Ok(NextMsg::Message)
    }

    pub fn valid_msg(&mut self) -> bool {
        self.valid
    }

    pub fn ignore_msg(&mut self) {
        self.inner.ignore_msg();
    }

    pub fn payload(&self) -> &[u8] {
        self.inner.payload()
    }

    pub fn writer(&mut self) -> &mut Vec<u8> {
        self.inner.writer()
    }

    pub async fn send_msg<S: AsyncWrite + Unpin + Send>(&mut self, stream: &mut S) -> io::Result<bool> {
        let payload = std::mem::take(self.inner.writer());
        let crc = crc32(&payload);
        let mut with_crc = payload;
        with_crc.extend_from_slice(&crc.to_be_bytes());
        *self.inner.writer() = with_crc;
        self.inner.send_msg(stream).await
    }

    pub async fn drop_msg<S: AsyncWrite + Unpin + Send>(&mut self, stream: &mut S) -> io::Result<bool> {
        self.inner.drop_msg(stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::{escape_into, ATX, ESC, ETX, STX};
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn payload_with_all_control_bytes_roundtrips() {
        let (mut a, mut b) = duplex(4096);
        let mut writer = SerialCrcFraming::new();
        writer.writer().extend_from_slice(&[STX, ETX, ATX, ESC]);
        writer.send_msg(&mut a).await.unwrap();
        drop(a);

        let mut reader = SerialCrcFraming::new();
        assert!(matches!(reader.next_msg(&mut b).await.unwrap(), NextMsg::Message));
        assert!(reader.valid_msg());
        assert_eq!(reader.payload(), &[STX, ETX, ATX, ESC]);
    }

    #[tokio::test]
    async fn known_crc_bytes_for_worked_example() {
        let payload = [STX, ETX, ATX, ESC];
        assert_eq!(crc32(&payload).to_be_bytes(), [0x35, 0x1E, 0xB3, 0x90]);
    }

    #[tokio::test]
    async fn single_flipped_byte_fails_validation() {
        let (mut a, mut b) = duplex(4096);
        let mut writer = SerialCrcFraming::new();
        writer.writer().extend_from_slice(b"hello");
        writer.send_msg(&mut a).await.unwrap();
        drop(a);

        // Corrupt the payload's first byte on the wire by rebuilding it by hand.
        let mut corrupt = Vec::new();
        corrupt.push(STX);
        let mut bad_payload = b"hello".to_vec();
        bad_payload[0] ^= 0xFF;
        let crc = crc32(b"hello");
        escape_into(&mut corrupt, &bad_payload);
        escape_into(&mut corrupt, &crc.to_be_bytes());
        corrupt.push(ETX);

        let (mut a2, mut b2) = duplex(4096);
        a2.write_all(&corrupt).await.unwrap();
        drop(a2);

        let mut reader = SerialCrcFraming::new();
        assert!(matches!(reader.next_msg(&mut b2).await.unwrap(), NextMsg::Message));
        assert!(!reader.valid_msg());

        // drain the original good duplex so it isn't flagged unused
        let mut good_reader = SerialCrcFraming::new();
        assert!(matches!(good_reader.next_msg(&mut b).await.unwrap(), NextMsg::Message));
        assert!(good_reader.valid_msg());
    }
}
