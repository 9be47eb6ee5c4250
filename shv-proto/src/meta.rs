//! Message meta tags and the decoded [`Meta`] envelope.

use std::io::{self, Read};

use shv_chainpack::{ChainPackReader, Unpacker};
use shv_value::{AccessLevel, Item};

/// Integer tags used inside the `Meta` container.
pub mod tag {
    pub const META_TYPE_ID: i64 = 1;
    pub const META_NAMESPACE_ID: i64 = 2;
    pub const REQUEST_ID: i64 = 8;
    pub const SHV_PATH: i64 = 9;
    /// Same tag carries the signal name when there is no `RequestId`.
    pub const METHOD: i64 = 10;
    pub const CALLER_IDS: i64 = 11;
    pub const ACCESS_GRANTED: i64 = 14;
    pub const USER_ID: i64 = 16;
    pub const ACCESS_LEVEL: i64 = 17;
    pub const SOURCE: i64 = 19;
    pub const REPEAT: i64 = 20;
}

/// The integer type-id value `MetaTypeId` must carry.
pub const MESSAGE_TYPE_ID: i64 = 1;

/// Integer keys inside a message's `IMap` content.
pub mod imap_key {
    pub const PARAM: i64 = 1;
    pub const RESULT: i64 = 2;
    pub const ERROR: i64 = 3;
}

/// Limits enforced while decoding a `Meta` container. A broker sets
/// `preserve_unknown_tags` so it can re-emit tags it doesn't understand
/// verbatim when forwarding.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_path_len: usize,
    pub max_method_len: usize,
    pub max_user_id_len: usize,
    pub preserve_unknown_tags: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_path_len: 1024,
            max_method_len: 255,
            max_user_id_len: 1024,
            preserve_unknown_tags: false,
        }
    }
}

/// A decoded `Meta` envelope. `method` doubles as the signal name on
/// signals, per the wire tag it shares with requests.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    pub request_id: Option<i64>,
    pub shv_path: String,
    pub method: Option<String>,
    pub caller_ids: Vec<i64>,
    pub access_granted: Option<String>,
    pub user_id: Option<String>,
    pub access_level: Option<AccessLevel>,
    pub source: Option<String>,
    pub repeat: bool,
    /// `(tag, value)` pairs for tags not recognized above, kept verbatim
    /// only when [`Limits::preserve_unknown_tags`] is set.
    pub unknown: Vec<(i64, Item)>,
}

/// The derived message kind, per §3 of the envelope invariants: requests
/// carry both `RequestId` and `Method`; responses and errors carry
/// `RequestId` alone, distinguished by the presence of the `Error` IMap
/// key; signals carry neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Request,
    Response,
    Error,
    Signal,
}

impl Meta {
    pub fn kind(&self, imap_has_error: bool) -> Kind {
        match (self.request_id, self.method.is_some(), imap_has_error) {
            (Some(_), true, _) => Kind::Request,
            (Some(_), false, true) => Kind::Error,
            (Some(_), false, false) => Kind::Response,
            (None, _, _) => Kind::Signal,
        }
    }

    /// Signal source, defaulting to `"get"` when absent.
    pub fn source_or_default(&self) -> &str {
        self.source.as_deref().unwrap_or("get")
    }

    /// Signal name, defaulting to `"chng"` when absent (only meaningful
    /// once `kind()` has identified this as a signal).
    pub fn signal_or_default(&self) -> &str {
        self.method.as_deref().unwrap_or("chng")
    }
}

/// Reads a `Meta` container's key/value pairs up to its `ContainerEnd`.
/// The caller has already consumed the leading `Item::Meta` marker.
pub fn read_meta<R: Read>(u: &mut Unpacker<R>, limits: &Limits) -> io::Result<Meta> {
    let mut meta = Meta::default();
    loop {
        let key_item = u.unpack()?;
        if matches!(key_item, Item::ContainerEnd) {
            return Ok(meta);
        }
        let Some(t) = key_item.as_int() else {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "meta key is not an integer"));
        };
        match t {
            tag::META_TYPE_ID | tag::META_NAMESPACE_ID => {
                u.unpack()?;
            }
            tag::REQUEST_ID => {
                meta.request_id = u.unpack()?.as_int();
            }
            tag::SHV_PATH => {
                let v = u.unpack()?;
                meta.shv_path = u.strdup(v, Some(limits.max_path_len))?;
            }
            tag::METHOD => {
                let v = u.unpack()?;
                meta.method = Some(u.strdup(v, Some(limits.max_method_len))?);
            }
            tag::CALLER_IDS => {
                u.unpack()?; // List
                let mut ids = Vec::new();
                u.for_list(|item| {
                    ids.push(item.as_int().unwrap_or_default());
                    Ok(())
                })?;
                meta.caller_ids = ids;
            }
            tag::ACCESS_GRANTED => {
                let v = u.unpack()?;
                meta.access_granted = Some(u.strdup(v, None)?);
            }
            tag::USER_ID => {
                let v = u.unpack()?;
                meta.user_id = Some(u.strdup(v, Some(limits.max_user_id_len))?);
            }
            tag::ACCESS_LEVEL => {
                meta.access_level = u.unpack()?.as_int().and_then(|n| AccessLevel::from_u8(n as u8));
            }
            tag::SOURCE => {
                let v = u.unpack()?;
                meta.source = Some(u.strdup(v, None)?);
            }
            tag::REPEAT => {
                meta.repeat = u.unpack()?.as_bool().unwrap_or(false);
            }
            other => {
                let v = u.unpack()?;
                if limits.preserve_unknown_tags {
                    meta.unknown.push((other, v));
                } else if v.is_container_open() {
                    u.skip(1)?;
                }
            }
        }
    }
}

/// Finds `key` in the `IMap` content section following a message's `Meta`
/// header, materializing strings/blobs in full. `payload` must start at the
/// leading `Item::Meta` marker (the raw bytes a transport hands back).
pub fn find_imap_field(payload: &[u8], limits: &Limits, key: i64) -> io::Result<Option<Item>> {
    let mut u = Unpacker::chain_pack(payload);
    if !matches!(u.unpack()?, Item::Meta) {
        return Ok(None);
    }
    read_meta(&mut u, limits)?;
    if !matches!(u.unpack()?, Item::IMap) {
        return Ok(None);
    }
    loop {
        let key_item = u.unpack()?;
        if matches!(key_item, Item::ContainerEnd) {
            return Ok(None);
        }
        let k = key_item.as_int();
        let value = u.unpack()?;
        if k != Some(key) {
            if value.is_container_open() {
                u.skip(1)?;
            }
            continue;
        }
        return match value {
            Item::String(_) => {
                let bytes = u.memdup(value, None)?;
                Ok(Some(Item::String(shv_value::Chunk::whole(bytes))))
            }
            Item::Blob(_) => {
                let bytes = u.memdup(value, None)?;
                Ok(Some(Item::Blob(shv_value::Chunk::whole(bytes))))
            }
            other => Ok(Some(other)),
        };
    }
}

/// Decodes `payload`'s leading `Meta` and hands back the raw bytes that
/// follow it untouched (the `IMap` marker through its closing
/// `ContainerEnd`) — what a broker forwarding a message needs to pair a
/// rewritten envelope with the original content without re-encoding it.
pub fn split_meta(payload: &[u8], limits: &Limits) -> io::Result<(Meta, &[u8])> {
    let cursor = io::Cursor::new(payload);
    let mut reader = ChainPackReader::new(cursor);
    if !matches!(reader.unpack()?, Item::Meta) {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "payload does not start with Meta"));
    }
    let mut u = Unpacker::ChainPack(reader);
    let meta = read_meta(&mut u, limits)?;
    let Unpacker::ChainPack(reader) = u else { unreachable!() };
    let pos = reader.into_inner().position() as usize;
    Ok((meta, &payload[pos..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shv_chainpack::{ChainPackWriter, Packer};

    #[test]
    fn request_meta_roundtrips() {
        let mut buf = Vec::new();
        {
            let mut w = ChainPackWriter::new(&mut buf);
            w.pack(&Item::Meta).unwrap();
            w.pack(&Item::Int(tag::META_TYPE_ID)).unwrap();
            w.pack(&Item::Int(MESSAGE_TYPE_ID)).unwrap();
            w.pack(&Item::Int(tag::REQUEST_ID)).unwrap();
            w.pack(&Item::Int(42)).unwrap();
            w.pack(&Item::Int(tag::SHV_PATH)).unwrap();
            w.pack(&Item::String(shv_value::Chunk::whole(b".app".to_vec()))).unwrap();
            w.pack(&Item::Int(tag::METHOD)).unwrap();
            w.pack(&Item::String(shv_value::Chunk::whole(b"ping".to_vec()))).unwrap();
            w.pack(&Item::ContainerEnd).unwrap();
        }
        let mut u = Unpacker::chain_pack(&buf[..]);
        assert_eq!(u.unpack().unwrap(), Item::Meta);
        let meta = read_meta(&mut u, &Limits::default()).unwrap();
        assert_eq!(meta.request_id, Some(42));
        assert_eq!(meta.shv_path, ".app");
        assert_eq!(meta.method.as_deref(), Some("ping"));
        assert_eq!(meta.kind(false), Kind::Request);
    }

    #[test]
    fn unknown_tags_are_dropped_unless_preserved() {
        let mut buf = Vec::new();
        {
            let mut w = ChainPackWriter::new(&mut buf);
            w.pack(&Item::Meta).unwrap();
            w.pack(&Item::Int(99)).unwrap();
            w.pack(&Item::Int(7)).unwrap();
            w.pack(&Item::ContainerEnd).unwrap();
        }
        let mut u = Unpacker::chain_pack(&buf[..]);
        u.unpack().unwrap();
        let meta = read_meta(&mut u, &Limits::default()).unwrap();
        assert!(meta.unknown.is_empty());

        let mut u = Unpacker::chain_pack(&buf[..]);
        u.unpack().unwrap();
        let limits = Limits { preserve_unknown_tags: true, ..Limits::default() };
        let meta = read_meta(&mut u, &limits).unwrap();
        assert_eq!(meta.unknown, vec![(99, Item::Int(7))]);
    }

    #[test]
    fn signal_without_request_id_has_signal_kind() {
        let meta = Meta { method: Some("chng".to_string()), ..Meta::default() };
        assert_eq!(meta.kind(false), Kind::Signal);
        assert_eq!(meta.source_or_default(), "get");
        assert_eq!(meta.signal_or_default(), "chng");
    }

    #[test]
    fn find_imap_field_locates_param_after_meta() {
        let mut buf = Vec::new();
        {
            let mut w = ChainPackWriter::new(&mut buf);
            w.pack(&Item::Meta).unwrap();
            w.pack(&Item::Int(tag::REQUEST_ID)).unwrap();
            w.pack(&Item::Int(1)).unwrap();
            w.pack(&Item::ContainerEnd).unwrap();
            w.pack(&Item::IMap).unwrap();
            w.pack(&Item::Int(imap_key::PARAM)).unwrap();
            w.pack(&Item::Int(7)).unwrap();
            w.pack(&Item::ContainerEnd).unwrap();
        }
        let found = find_imap_field(&buf, &Limits::default(), imap_key::PARAM).unwrap();
        assert_eq!(found, Some(Item::Int(7)));
        let missing = find_imap_field(&buf, &Limits::default(), imap_key::RESULT).unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn split_meta_returns_imap_content_untouched() {
        let mut buf = Vec::new();
        {
            let mut w = ChainPackWriter::new(&mut buf);
            w.pack(&Item::Meta).unwrap();
            w.pack(&Item::Int(tag::REQUEST_ID)).unwrap();
            w.pack(&Item::Int(9)).unwrap();
            w.pack(&Item::ContainerEnd).unwrap();
            w.pack(&Item::IMap).unwrap();
            w.pack(&Item::Int(imap_key::PARAM)).unwrap();
            w.pack(&Item::Int(42)).unwrap();
            w.pack(&Item::ContainerEnd).unwrap();
        }
        let (meta, rest) = split_meta(&buf, &Limits::default()).unwrap();
        assert_eq!(meta.request_id, Some(9));
        let mut u = Unpacker::chain_pack(rest);
        assert_eq!(u.unpack().unwrap(), Item::IMap);
        assert_eq!(u.unpack().unwrap().as_int(), Some(imap_key::PARAM));
        assert_eq!(u.unpack().unwrap(), Item::Int(42));
        assert_eq!(u.unpack().unwrap(), Item::ContainerEnd);
    }
}
