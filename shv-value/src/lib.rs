//! The self-describing data model shared by the ChainPack and CPON codecs.
//!
//! [`Item`] is the streaming unit both codecs pack and unpack; [`Decimal`],
//! [`DateTime`] and [`AccessLevel`] are the auxiliary value types it carries.

mod access;
mod datetime;
mod decimal;
mod error;
mod item;

pub use access::{AccessLevel, ParseAccessLevelError};
pub use datetime::DateTime;
pub use decimal::Decimal;
pub use error::ErrorKind;
pub use item::{Chunk, ChunkFlags, Item};

pub mod prelude {
    pub use crate::{AccessLevel, Chunk, ChunkFlags, DateTime, Decimal, ErrorKind, Item};
}
