use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::NextMsg;

#[cfg(feature = "block")]
use crate::BlockFraming;
#[cfg(feature = "serial")]
use crate::{SerialCrcFraming, SerialFraming};
#[cfg(feature = "unstable-can")]
use crate::CanFraming;

/// A stream transport paired with whichever framing it negotiated.
///
/// Hand-dispatches to the active framing's inherent methods rather than
/// going through a trait object, since the framings differ only in how
/// they delimit frames on the wire, not in what they expose.
pub enum Transport<S> {
    #[cfg(feature = "block")]
    Block(S, BlockFraming),
    #[cfg(feature = "serial")]
    Serial(S, SerialFraming),
    #[cfg(feature = "serial")]
    SerialCrc(S, SerialCrcFraming),
    #[cfg(feature = "unstable-can")]
    Can(S, CanFraming),
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    #[cfg(feature = "block")]
    pub fn block(stream: S) -> Self {
        Self::Block(stream, BlockFraming::new())
    }

    #[cfg(feature = "serial")]
    pub fn serial(stream: S) -> Self {
        Self::Serial(stream, SerialFraming::new())
    }

    #[cfg(feature = "serial")]
    pub fn serial_crc(stream: S) -> Self {
        Self::SerialCrc(stream, SerialCrcFraming::new())
    }

    pub async fn next_msg(&mut self) -> io::Result<NextMsg> {
        match self {
            #[cfg(feature = "block")]
            Self::Block(stream, framing) => framing.next_msg(stream).await,
            #[cfg(feature = "serial")]
            Self::Serial(stream, framing) => framing.next_msg(stream).await,
            #[cfg(feature = "serial")]
            Self::SerialCrc(stream, framing) => framing.next_msg(stream).await,
            #[cfg(feature = "unstable-can")]
            Self::Can(stream, framing) => framing.next_msg(stream).await,
        }
    }

    pub fn valid_msg(&mut self) -> bool {
        match self {
            #[cfg(feature = "block")]
            Self::Block(_, framing) => framing.valid_msg(),
            #[cfg(feature = "serial")]
            Self::Serial(_, framing) => framing.valid_msg(),
            #[cfg(feature = "serial")]
            Self::SerialCrc(_, framing) => framing.valid_msg(),
            #[cfg(feature = "unstable-can")]
            Self::Can(_, framing) => framing.valid_msg(),
        }
    }

    pub fn ignore_msg(&mut self) {
        match self {
            #[cfg(feature = "block")]
            Self::Block(_, framing) => framing.ignore_msg(),
            #[cfg(feature = "serial")]
            Self::Serial(_, framing) => framing.ignore_msg(),
            #[cfg(feature = "serial")]
            Self::SerialCrc(_, framing) => framing.ignore_msg(),
            #[cfg(feature = "unstable-can")]
            Self::Can(_, framing) => framing.ignore_msg(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            #[cfg(feature = "block")]
            Self::Block(_, framing) => framing.payload(),
            #[cfg(feature = "serial")]
            Self::Serial(_, framing) => framing.payload(),
            #[cfg(feature = "serial")]
            Self::SerialCrc(_, framing) => framing.payload(),
            #[cfg(feature = "unstable-can")]
            Self::Can(_, framing) => framing.payload(),
        }
    }

    pub fn writer(&mut self) -> &mut Vec<u8> {
        match self {
            #[cfg(feature = "block")]
            Self::Block(_, framing) => framing.writer(),
            #[cfg(feature = "serial")]
            Self::Serial(_, framing) => framing.writer(),
            #[cfg(feature = "serial")]
            Self::SerialCrc(_, framing) => framing.writer(),
            #[cfg(feature = "unstable-can")]
            Self::Can(_, framing) => framing.writer(),
        }
    }

    pub async fn send_msg(&mut self) -> io::Result<bool> {
        match self {
            #[cfg(feature = "block")]
            Self::Block(stream, framing) => framing.send_msg(stream).await,
            #[cfg(feature = "serial")]
            Self::Serial(stream, framing) => framing.send_msg(stream).await,
            #[cfg(feature = "serial")]
            Self::SerialCrc(stream, framing) => framing.send_msg(stream).await,
            #[cfg(feature = "unstable-can")]
            Self::Can(stream, framing) => framing.send_msg(stream).await,
        }
    }

    pub async fn drop_msg(&mut self) -> io::Result<bool> {
        match self {
            #[cfg(feature = "block")]
            Self::Block(stream, framing) => framing.drop_msg(stream).await,
            #[cfg(feature = "serial")]
            Self::Serial(stream, framing) => framing.drop_msg(stream).await,
            #[cfg(feature = "serial")]
            Self::SerialCrc(stream, framing) => framing.drop_msg(stream).await,
            #[cfg(feature = "unstable-can")]
            Self::Can(stream, framing) => framing.drop_msg(stream).await,
        }
    }
}

#[cfg(all(test, feature = "block"))]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn block_transport_roundtrips_a_message() {
        let (a, b) = duplex(4096);
        let mut client = Transport::block(a);
        let mut server = Transport::block(b);

        client.writer().extend_from_slice(b"hello");
        assert!(client.send_msg().await.unwrap());

        assert!(matches!(server.next_msg().await.unwrap(), NextMsg::Message));
        assert_eq!(server.payload(), b"hello");
    }
}
