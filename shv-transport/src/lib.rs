//! Framed stream transports carrying ChainPack-encoded SHV RPC messages.
//!
//! Each framing (`Block`, `Serial`, `Serial+CRC`, and the feature-gated CAN
//! framing) exposes the same small set of async operations: `next_msg`,
//! `valid_msg`, `ignore_msg`, `payload`, `writer`, `send_msg`, `drop_msg`.
//! [`Transport`] forwards to whichever framing is active.

#[cfg(feature = "unstable-can")]
mod can;
pub mod crc32;
#[cfg(feature = "serial")]
mod serial;
#[cfg(feature = "serial")]
mod serial_crc;
mod transport;

#[cfg(feature = "block")]
mod block;

#[cfg(feature = "block")]
pub use block::BlockFraming;
#[cfg(feature = "serial")]
pub use serial::SerialFraming;
#[cfg(feature = "serial")]
pub use serial_crc::SerialCrcFraming;

#[cfg(feature = "unstable-can")]
pub use can::{CanFraming, CanFrameSink, CanFrameSource};

pub use transport::Transport;

/// The result of polling a framing layer for the next message.
#[derive(Debug)]
pub enum NextMsg {
    /// A complete message is buffered; call `payload()`/`valid_msg()`.
    Message,
    /// Clean end of stream, or no complete frame yet.
    Nothing,
    /// The peer sent an explicit session reset (Block framing only).
    Reset,
    /// A framing-level error occurred; the connection should be dropped.
    Error(String),
}

pub mod prelude {
    #[cfg(feature = "block")]
    pub use crate::BlockFraming;
    #[cfg(feature = "serial")]
    pub use crate::{SerialCrcFraming, SerialFraming};
    pub use crate::{NextMsg, Transport};
}
