use bitflags::bitflags;

use crate::{Decimal, DateTime, ErrorKind};

bitflags! {
    /// Flags describing where a [`Chunk`] sits in a streamed Blob/String,
    /// bit-for-bit identical to `CPBI_F_*` in the reference implementation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChunkFlags: u8 {
        /// This is the first (or only) chunk of the value.
        const FIRST = 1 << 0;
        /// This is the last (or only) chunk of the value.
        const LAST = 1 << 1;
        /// The value is being streamed in an unknown number of further
        /// chunks (length is not yet known).
        const STREAMED = 1 << 2;
        /// The chunk's bytes are hex-encoded on the wire (CPON blobs only).
        const HEX = 1 << 3;
    }
}

impl ChunkFlags {
    /// Flags for a value that fits in a single, complete chunk.
    pub const SINGLE: ChunkFlags = ChunkFlags::FIRST.union(ChunkFlags::LAST);

    pub fn is_first(self) -> bool {
        self.contains(ChunkFlags::FIRST)
    }

    pub fn is_last(self) -> bool {
        self.contains(ChunkFlags::LAST)
    }
}

/// One piece of a Blob or String value.
///
/// Blob and String items may be streamed across multiple [`Item`]s rather
/// than materialized whole; `data` always holds raw bytes (even for String)
/// so a chunk boundary can split a multi-byte UTF-8 sequence without losing
/// information. Use the generic pack/unpack facade in `shv-chainpack` to
/// reassemble chunks into a contiguous `Vec<u8>` / `String`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub data: Vec<u8>,
    /// Bytes still to come after this chunk, if known (0 when `LAST` is
    /// set, or when the total length was not advertised up front).
    pub remaining: u64,
    pub flags: ChunkFlags,
}

impl Chunk {
    pub fn whole(data: Vec<u8>) -> Self {
        Self { data, remaining: 0, flags: ChunkFlags::SINGLE }
    }
}

/// A single self-describing value as produced or consumed by the ChainPack
/// and CPON codecs.
///
/// `List`, `Map`, `IMap` and `Meta` are openers: the codec emits them and
/// then the contained items follow, terminated by a matching
/// [`Item::ContainerEnd`]. This mirrors `enum cpitem_type` in the reference
/// implementation and keeps the type usable for streaming decode without
/// building an intermediate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Decimal(Decimal),
    DateTime(DateTime),
    Blob(Chunk),
    String(Chunk),
    /// Opens a list container; items follow until `ContainerEnd`.
    List,
    /// Opens a map container (string keys); items follow until `ContainerEnd`.
    Map,
    /// Opens an int-keyed map container; items follow until `ContainerEnd`.
    IMap,
    /// Opens a meta container (attached ahead of the value it describes);
    /// items follow until `ContainerEnd`.
    Meta,
    /// Closes the innermost open container.
    ContainerEnd,
    /// Not a value: marks that decoding failed.
    Invalid(ErrorKind),
}

impl Item {
    pub fn is_container_open(&self) -> bool {
        matches!(self, Item::List | Item::Map | Item::IMap | Item::Meta)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Item::Int(v) => Some(*v),
            Item::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Item::UInt(v) => Some(*v),
            Item::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Item::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_flags_single_is_first_and_last() {
        assert!(ChunkFlags::SINGLE.is_first());
        assert!(ChunkFlags::SINGLE.is_last());
        assert!(!ChunkFlags::SINGLE.contains(ChunkFlags::STREAMED));
    }

    #[test]
    fn chunk_whole_wraps_data() {
        let c = Chunk::whole(vec![1, 2, 3]);
        assert_eq!(c.data, vec![1, 2, 3]);
        assert_eq!(c.remaining, 0);
        assert!(c.flags.is_last());
    }

    #[test]
    fn as_int_widens_uint() {
        assert_eq!(Item::UInt(7).as_int(), Some(7));
        assert_eq!(Item::Int(-1).as_uint(), None);
    }

    #[test]
    fn container_open_detection() {
        assert!(Item::List.is_container_open());
        assert!(Item::Meta.is_container_open());
        assert!(!Item::ContainerEnd.is_container_open());
        assert!(!Item::Null.is_container_open());
    }
}
