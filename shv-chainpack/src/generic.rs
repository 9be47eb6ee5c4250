//! Format-agnostic pack/unpack facade over [`crate::ChainPackReader`]/
//! [`crate::ChainPackWriter`] and [`crate::CponReader`]/[`crate::CponWriter`],
//! mirroring the reference implementation's generic `cp_pack_t`/`cp_unpack_t`
//! function-pointer interface with ordinary enum dispatch instead.

use std::io::{self, Read, Write};

use shv_value::{ChunkFlags, Item};

use crate::{ChainPackReader, ChainPackWriter, CponReader, CponWriter};

/// A reader over either wire format, presenting one `Item` at a time.
pub enum Unpacker<R> {
    ChainPack(ChainPackReader<R>),
    Cpon(CponReader),
}

impl<R: Read> Unpacker<R> {
    pub fn chain_pack(inner: R) -> Self {
        Unpacker::ChainPack(ChainPackReader::new(inner))
    }

    pub fn unpack(&mut self) -> io::Result<Item> {
        match self {
            Unpacker::ChainPack(r) => r.unpack(),
            Unpacker::Cpon(r) => r.unpack(),
        }
    }

    /// Advances past the current item, recursing into containers and
    /// unwinding `extra_depth` additional enclosing containers.
    ///
    /// `extra_depth` is how many container closes are already owed before
    /// this call reads anything (0 for an item not yet consumed; 1 if the
    /// caller already consumed that item's own opening `Map`/`List`/etc.
    /// and just wants the remainder skipped through its matching
    /// `ContainerEnd`). Returns the instant the debt reaches zero, whether
    /// that happens on a plain scalar or right after closing a container.
    pub fn skip(&mut self, extra_depth: u32) -> io::Result<()> {
        let mut depth = extra_depth;
        loop {
            let item = self.unpack()?;
            if item.is_container_open() {
                depth += 1;
                continue;
            }
            if matches!(item, Item::ContainerEnd) {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
                continue;
            }
            if depth == 0 {
                return Ok(());
            }
        }
    }

    /// Finishes a chunked string/blob whose `FIRST` chunk has already been
    /// read, discarding the remaining bytes without copying them out.
    pub fn drop_value(&mut self, first: &shv_value::Chunk) -> io::Result<()> {
        if first.flags.is_last() {
            return Ok(());
        }
        loop {
            match self.unpack()? {
                Item::Blob(c) | Item::String(c) => {
                    if c.flags.is_last() {
                        return Ok(());
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Reads a (possibly chunked) string/blob item fully into a `Vec<u8>`,
    /// optionally bounded by `max_len` (returns `Overflow` if exceeded).
    pub fn memdup(&mut self, first_item: Item, max_len: Option<usize>) -> io::Result<Vec<u8>> {
        let mut out = match first_item {
            Item::Blob(c) | Item::String(c) => c.data,
            _ => return Err(io::Error::new(io::ErrorKind::InvalidData, "expected Blob or String")),
        };
        loop {
            if let Some(limit) = max_len {
                if out.len() > limit {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "value exceeds max_len"));
                }
            }
            let last = match self.unpack()? {
                Item::Blob(c) | Item::String(c) => {
                    let is_last = c.flags.is_last();
                    out.extend_from_slice(&c.data);
                    is_last
                }
                _ => true,
            };
            if last {
                break;
            }
        }
        Ok(out)
    }

    pub fn strdup(&mut self, first_item: Item, max_len: Option<usize>) -> io::Result<String> {
        let bytes = self.memdup(first_item, max_len)?;
        String::from_utf8(bytes).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "value is not valid UTF-8"))
    }

    /// Streams a chunked string/blob into a caller-owned buffer, returning
    /// the number of bytes actually copied (may be less than the full value
    /// when `buf` is shorter — analogous to `memcpy`'s truncation return).
    pub fn memcpy(&mut self, first_item: Item, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0usize;
        let mut copy_chunk = |data: &[u8], written: &mut usize| {
            let room = buf.len() - *written;
            let n = data.len().min(room);
            buf[*written..*written + n].copy_from_slice(&data[..n]);
            *written += n;
        };
        match &first_item {
            Item::Blob(c) | Item::String(c) => copy_chunk(&c.data, &mut written),
            _ => return Err(io::Error::new(io::ErrorKind::InvalidData, "expected Blob or String")),
        }
        let mut last = matches!(&first_item, Item::Blob(c) | Item::String(c) if c.flags.is_last());
        while !last {
            match self.unpack()? {
                Item::Blob(c) | Item::String(c) => {
                    copy_chunk(&c.data, &mut written);
                    last = c.flags.is_last();
                }
                _ => break,
            }
        }
        Ok(written)
    }

    /// Iterates items inside a List until `ContainerEnd`, calling `f` once
    /// per element.
    pub fn for_list(&mut self, mut f: impl FnMut(Item) -> io::Result<()>) -> io::Result<()> {
        loop {
            let item = self.unpack()?;
            if matches!(item, Item::ContainerEnd) {
                return Ok(());
            }
            f(item)?;
        }
    }

    /// Iterates `(key, value)` pairs inside a Map until `ContainerEnd`.
    pub fn for_map(&mut self, mut f: impl FnMut(String, Item) -> io::Result<()>) -> io::Result<()> {
        loop {
            let key_item = self.unpack()?;
            if matches!(key_item, Item::ContainerEnd) {
                return Ok(());
            }
            let key = self.strdup(key_item, None)?;
            let value = self.unpack()?;
            f(key, value)?;
        }
    }

    /// Iterates `(int key, value)` pairs inside an IMap until `ContainerEnd`.
    pub fn for_imap(&mut self, mut f: impl FnMut(i64, Item) -> io::Result<()>) -> io::Result<()> {
        loop {
            let key_item = self.unpack()?;
            if matches!(key_item, Item::ContainerEnd) {
                return Ok(());
            }
            let key = key_item.as_int().ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "IMap key is not an int"))?;
            let value = self.unpack()?;
            f(key, value)?;
        }
    }
}

impl Unpacker<io::Cursor<Vec<u8>>> {
    /// `R` is unused by the `Cpon` variant (`CponReader` owns its buffer
    /// directly); `Cursor<Vec<u8>>` is picked here only so this still
    /// satisfies the `R: Read` bound the `ChainPack` arm needs.
    pub fn cpon(buf: Vec<u8>) -> Self {
        Unpacker::Cpon(CponReader::new(buf))
    }
}

/// A writer over either wire format.
pub enum Packer<W> {
    ChainPack(ChainPackWriter<W>),
    Cpon(CponWriter<W>),
}

impl<W: Write> Packer<W> {
    pub fn chain_pack(inner: W) -> Self {
        Packer::ChainPack(ChainPackWriter::new(inner))
    }

    pub fn cpon(inner: W) -> Self {
        Packer::Cpon(CponWriter::new(inner))
    }

    pub fn pack(&mut self, item: &Item) -> io::Result<usize> {
        match self {
            Packer::ChainPack(w) => w.pack(item),
            Packer::Cpon(w) => w.pack(item),
        }
    }

    pub fn pack_null(&mut self) -> io::Result<usize> {
        self.pack(&Item::Null)
    }

    pub fn pack_bool(&mut self, v: bool) -> io::Result<usize> {
        self.pack(&Item::Bool(v))
    }

    pub fn pack_int(&mut self, v: i64) -> io::Result<usize> {
        self.pack(&Item::Int(v))
    }

    pub fn pack_uint(&mut self, v: u64) -> io::Result<usize> {
        self.pack(&Item::UInt(v))
    }

    pub fn pack_string(&mut self, s: &str) -> io::Result<usize> {
        self.pack(&Item::String(shv_value::Chunk::whole(s.as_bytes().to_vec())))
    }

    pub fn pack_blob(&mut self, b: &[u8]) -> io::Result<usize> {
        self.pack(&Item::Blob(shv_value::Chunk::whole(b.to_vec())))
    }

    pub fn list_begin(&mut self) -> io::Result<usize> {
        self.pack(&Item::List)
    }

    pub fn map_begin(&mut self) -> io::Result<usize> {
        self.pack(&Item::Map)
    }

    pub fn imap_begin(&mut self) -> io::Result<usize> {
        self.pack(&Item::IMap)
    }

    pub fn meta_begin(&mut self) -> io::Result<usize> {
        self.pack(&Item::Meta)
    }

    pub fn container_end(&mut self) -> io::Result<usize> {
        self.pack(&Item::ContainerEnd)
    }
}

/// A packer that fans every item out to several recipient packers; used by
/// the broker to emit one signal to many subscribers at once. A send
/// failure on one recipient drops it from the set silently rather than
/// failing the whole fan-out.
pub struct Multipack<W> {
    recipients: Vec<(usize, Packer<W>)>,
}

impl<W: Write> Multipack<W> {
    pub fn new() -> Self {
        Self { recipients: Vec::new() }
    }

    pub fn add(&mut self, id: usize, packer: Packer<W>) {
        self.recipients.push((id, packer));
    }

    /// Packs `item` into every surviving recipient, dropping (and
    /// returning) the ids of any that failed.
    pub fn pack(&mut self, item: &Item) -> Vec<usize> {
        let mut failed = Vec::new();
        self.recipients.retain_mut(|(id, p)| {
            if p.pack(item).is_ok() {
                true
            } else {
                failed.push(*id);
                false
            }
        });
        failed
    }

    pub fn recipient_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.recipients.iter().map(|(id, _)| *id)
    }

    /// Consumes the fan-out, handing back each surviving recipient's id
    /// and its underlying writer, so the caller can finalize or flush it
    /// (e.g. hand a finished buffer off to that recipient's send queue).
    pub fn into_writers(self) -> Vec<(usize, W)> {
        self.recipients
            .into_iter()
            .map(|(id, p)| {
                let Packer::ChainPack(w) = p else { unreachable!("Multipack only ever wraps chain_pack writers") };
                (id, w.into_inner())
            })
            .collect()
    }
}

impl<W: Write> Default for Multipack<W> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shv_value::Chunk;

    #[test]
    fn skip_unwinds_nested_containers() {
        let mut buf = Vec::new();
        let mut w = ChainPackWriter::new(&mut buf);
        w.pack(&Item::List).unwrap();
        w.pack(&Item::Int(1)).unwrap();
        w.pack(&Item::List).unwrap();
        w.pack(&Item::Int(2)).unwrap();
        w.pack(&Item::ContainerEnd).unwrap();
        w.pack(&Item::ContainerEnd).unwrap();
        w.pack(&Item::Int(99)).unwrap();

        let mut u = Unpacker::chain_pack(&buf[..]);
        assert_eq!(u.unpack().unwrap(), Item::List);
        u.skip(0).unwrap(); // skip the Int(1)
        u.skip(0).unwrap(); // skip the nested list entirely
        assert_eq!(u.unpack().unwrap(), Item::ContainerEnd);
        assert_eq!(u.unpack().unwrap(), Item::Int(99));
    }

    #[test]
    fn memdup_reassembles_chunks() {
        let mut buf = Vec::new();
        let mut w = ChainPackWriter::new(&mut buf);
        w.pack(&Item::String(Chunk {
            data: b"ab".to_vec(),
            remaining: 0,
            flags: ChunkFlags::FIRST | ChunkFlags::STREAMED,
        }))
        .unwrap();
        w.pack(&Item::String(Chunk {
            data: b"cd".to_vec(),
            remaining: 0,
            flags: ChunkFlags::LAST | ChunkFlags::STREAMED,
        }))
        .unwrap();

        let mut u = Unpacker::chain_pack(&buf[..]);
        let first = u.unpack().unwrap();
        assert_eq!(u.strdup(first, None).unwrap(), "abcd");
    }

    #[test]
    fn for_map_yields_pairs() {
        let mut buf = Vec::new();
        let mut w = ChainPackWriter::new(&mut buf);
        w.pack(&Item::Map).unwrap();
        w.pack(&Item::String(Chunk::whole(b"a".to_vec()))).unwrap();
        w.pack(&Item::Int(1)).unwrap();
        w.pack(&Item::String(Chunk::whole(b"b".to_vec()))).unwrap();
        w.pack(&Item::Int(2)).unwrap();
        w.pack(&Item::ContainerEnd).unwrap();

        let mut u = Unpacker::chain_pack(&buf[..]);
        assert_eq!(u.unpack().unwrap(), Item::Map);
        let mut seen = Vec::new();
        u.for_map(|k, v| {
            seen.push((k, v.as_int().unwrap()));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn multipack_fans_out_to_all_recipients() {
        let mut mp: Multipack<Vec<u8>> = Multipack::new();
        mp.add(1, Packer::chain_pack(Vec::new()));
        mp.add(2, Packer::chain_pack(Vec::new()));
        let failed = mp.pack(&Item::Int(5));
        assert!(failed.is_empty());
        assert_eq!(mp.recipient_ids().count(), 2);
    }
}
