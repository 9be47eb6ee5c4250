//! ChainPack wire constants, recovered byte-for-byte from
//! `include/shv/chainpack.h` in the reference implementation.

pub const EPOCH_MSEC: i64 = 1_517_529_600_000; // 2018-02-02T00:00:00Z

pub const SCHEME_NULL: u8 = 128;
pub const SCHEME_UINT: u8 = 129;
pub const SCHEME_INT: u8 = 130;
pub const SCHEME_DOUBLE: u8 = 131;
pub const SCHEME_BOOL: u8 = 132;
pub const SCHEME_BLOB: u8 = 133;
pub const SCHEME_STRING: u8 = 134;
// 135 = DateTimeEpoch_depr, unused.
pub const SCHEME_LIST: u8 = 136;
pub const SCHEME_MAP: u8 = 137;
pub const SCHEME_IMAP: u8 = 138;
pub const SCHEME_META_MAP: u8 = 139;
pub const SCHEME_DECIMAL: u8 = 140;
pub const SCHEME_DATE_TIME: u8 = 141;
pub const SCHEME_CSTRING: u8 = 142;
pub const SCHEME_BLOB_CHAIN: u8 = 143;

pub const SCHEME_FALSE: u8 = 253;
pub const SCHEME_TRUE: u8 = 254;
pub const SCHEME_TERM: u8 = 255;

/// Small-int tag bit: bytes 0..64 are a bare `UInt` magnitude, bytes
/// 64..128 (`0x40 | magnitude`) are the same magnitude range tagged `Int`.
/// Negative values always use the full `SCHEME_INT` + varint form.
pub const SMALL_INT_FLAG: u8 = 0x40;
