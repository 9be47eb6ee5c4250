use std::io::{self, Read, Write};

use shv_value::{Chunk, ChunkFlags, DateTime, Decimal, ErrorKind, Item};

use crate::scheme::*;
use crate::varint::{read_int, read_uint, write_int, write_uint};

/// Writes [`Item`]s as ChainPack binary.
///
/// Blob/String values may be packed across several calls: a call carrying
/// `FIRST` without `LAST` opens a value and subsequent calls append to it
/// until one carries `LAST`. Whether the declared length is known up front
/// (`!STREAMED`) decides whether the writer uses a plain length-prefixed
/// blob or the unbounded `BlobChain` scheme.
pub struct ChainPackWriter<W> {
    inner: W,
    pending: Option<PendingChunk>,
}

struct PendingChunk {
    is_string: bool,
    chained: bool,
}

impl<W: Write> ChainPackWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, pending: None }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Writes one item, returning the number of bytes written, or `0` on
    /// I/O failure (mirroring the reference `pack` contract).
    pub fn pack(&mut self, item: &Item) -> io::Result<usize> {
        let before = CountingSink::default();
        let mut counted = CountingWriter { inner: &mut self.inner, count: before };
        self.pending = write_item(&mut counted, self.pending.take(), item)?;
        Ok(counted.count.0)
    }
}

#[derive(Default)]
struct CountingSink(usize);

struct CountingWriter<'a, W> {
    inner: &'a mut W,
    count: CountingSink,
}

impl<W: Write> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count.0 += n;
        Ok(n)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn write_item<W: Write>(w: &mut W, pending: Option<PendingChunk>, item: &Item) -> io::Result<Option<PendingChunk>> {
    match item {
        Item::Null => w.write_all(&[SCHEME_NULL]).map(|_| None),
        Item::Bool(b) => w.write_all(&[if *b { SCHEME_TRUE } else { SCHEME_FALSE }]).map(|_| None),
        Item::Int(v) => write_tagged_int(w, *v).map(|_| None),
        Item::UInt(v) => write_tagged_uint(w, *v).map(|_| None),
        Item::Double(d) => {
            w.write_all(&[SCHEME_DOUBLE])?;
            w.write_all(&d.to_le_bytes())?;
            Ok(None)
        }
        Item::Decimal(d) => {
            w.write_all(&[SCHEME_DECIMAL])?;
            write_int(w, d.mantissa)?;
            write_int(w, d.exponent as i64)?;
            Ok(None)
        }
        Item::DateTime(dt) => {
            w.write_all(&[SCHEME_DATE_TIME])?;
            write_int(w, encode_datetime(*dt))?;
            Ok(None)
        }
        Item::List => w.write_all(&[SCHEME_LIST]).map(|_| None),
        Item::Map => w.write_all(&[SCHEME_MAP]).map(|_| None),
        Item::IMap => w.write_all(&[SCHEME_IMAP]).map(|_| None),
        Item::Meta => w.write_all(&[SCHEME_META_MAP]).map(|_| None),
        Item::ContainerEnd => w.write_all(&[SCHEME_TERM]).map(|_| None),
        Item::Invalid(_) => Err(io::Error::new(io::ErrorKind::InvalidInput, "cannot pack an Invalid item")),
        Item::Blob(chunk) => write_chunk(w, pending, chunk, false),
        Item::String(chunk) => write_chunk(w, pending, chunk, true),
    }
}

fn write_tagged_uint<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    if v < 64 {
        w.write_all(&[v as u8])
    } else {
        w.write_all(&[SCHEME_UINT])?;
        write_uint(w, v)
    }
}

fn write_tagged_int<W: Write>(w: &mut W, v: i64) -> io::Result<()> {
    if (0..64).contains(&v) {
        w.write_all(&[SMALL_INT_FLAG | v as u8])
    } else {
        w.write_all(&[SCHEME_INT])?;
        write_int(w, v)
    }
}

fn write_chunk<W: Write>(w: &mut W, pending: Option<PendingChunk>, chunk: &Chunk, is_string: bool) -> io::Result<Option<PendingChunk>> {
    let chained = chunk.flags.contains(ChunkFlags::STREAMED);
    let opening = pending.is_none();
    if opening {
        if chained {
            w.write_all(&[SCHEME_BLOB_CHAIN])?;
        } else {
            w.write_all(&[if is_string { SCHEME_STRING } else { SCHEME_BLOB }])?;
            let total = chunk.data.len() as u64 + chunk.remaining;
            write_uint(w, total)?;
        }
    }
    if chained {
        write_uint(w, chunk.data.len() as u64)?;
    }
    w.write_all(&chunk.data)?;
    if chunk.flags.is_last() {
        if chained {
            write_uint(w, 0)?; // terminating zero-length fragment
        }
        Ok(None)
    } else {
        Ok(Some(PendingChunk { is_string, chained }))
    }
}

/// Packs a `DateTime` into the single signed int ChainPack stores on the
/// wire, exactly as `chainpack_pack`'s `CPITEM_DATETIME` case.
fn encode_datetime(dt: DateTime) -> i64 {
    let mut msecs = dt.msecs - EPOCH_MSEC;
    let offset = dt.offset_quarter_hours() & 0x7f;
    let ms_rem = msecs.rem_euclid(1000);
    let mut no_msec = false;
    if ms_rem == 0 {
        msecs /= 1000;
        no_msec = true;
    }
    if offset != 0 {
        msecs = msecs * 128 + offset as i64;
    }
    msecs *= 4;
    if offset != 0 {
        msecs |= 1;
    }
    if no_msec {
        msecs |= 2;
    }
    msecs
}

fn decode_datetime(packed: i64) -> DateTime {
    let has_offset = packed & 1 != 0;
    let no_msec = packed & 2 != 0;
    let mut msecs = packed >> 2;
    let mut offset = 0i32;
    if has_offset {
        offset = (msecs & 0x7f) as i32;
        if offset >= 64 {
            offset -= 128;
        }
        msecs >>= 7;
    }
    if no_msec {
        msecs *= 1000;
    }
    msecs += EPOCH_MSEC;
    DateTime::new(msecs, offset * 15)
}

/// Reads [`Item`]s from ChainPack binary.
///
/// Unlike the writer, the reader always materializes a Blob/String value in
/// full (following `BlobChain` fragments to completion internally) and
/// returns it as a single `FIRST|LAST` chunk; arbitrary re-chunking for
/// bounded-buffer consumers is the job of the generic pack/unpack facade.
pub struct ChainPackReader<R> {
    inner: R,
}

impl<R: Read> ChainPackReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn unpack(&mut self) -> io::Result<Item> {
        let scheme = match read_u8(&mut self.inner) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Item::Invalid(ErrorKind::Eof)),
            Err(e) => return Err(e),
        };
        self.unpack_scheme(scheme)
    }

    fn unpack_scheme(&mut self, scheme: u8) -> io::Result<Item> {
        if scheme & 0x80 == 0 {
            return Ok(Item::UInt(scheme as u64));
        }
        if scheme & 0xc0 == SMALL_INT_FLAG {
            return Ok(Item::Int((scheme & 0x3f) as i64));
        }
        match scheme {
            SCHEME_NULL => Ok(Item::Null),
            SCHEME_FALSE => Ok(Item::Bool(false)),
            SCHEME_TRUE => Ok(Item::Bool(true)),
            SCHEME_UINT => Ok(Item::UInt(read_uint(&mut self.inner)?)),
            SCHEME_INT => Ok(Item::Int(read_int(&mut self.inner)?)),
            SCHEME_DOUBLE => {
                let mut b = [0u8; 8];
                self.inner.read_exact(&mut b)?;
                Ok(Item::Double(f64::from_le_bytes(b)))
            }
            SCHEME_DECIMAL => {
                let mantissa = read_int(&mut self.inner)?;
                let exponent = read_int(&mut self.inner)? as i32;
                Ok(Item::Decimal(Decimal::new(mantissa, exponent)))
            }
            SCHEME_DATE_TIME => Ok(Item::DateTime(decode_datetime(read_int(&mut self.inner)?))),
            SCHEME_BLOB => Ok(Item::Blob(Chunk::whole(self.read_length_prefixed()?))),
            SCHEME_STRING => Ok(Item::String(Chunk::whole(self.read_length_prefixed()?))),
            SCHEME_BLOB_CHAIN => Ok(Item::Blob(Chunk::whole(self.read_blob_chain()?))),
            SCHEME_CSTRING => Ok(Item::String(Chunk::whole(self.read_cstring()?))),
            SCHEME_LIST => Ok(Item::List),
            SCHEME_MAP => Ok(Item::Map),
            SCHEME_IMAP => Ok(Item::IMap),
            SCHEME_META_MAP => Ok(Item::Meta),
            SCHEME_TERM => Ok(Item::ContainerEnd),
            _ => Ok(Item::Invalid(ErrorKind::Malformed)),
        }
    }

    fn read_length_prefixed(&mut self) -> io::Result<Vec<u8>> {
        let len = read_uint(&mut self.inner)? as usize;
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_blob_chain(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let len = read_uint(&mut self.inner)? as usize;
            if len == 0 {
                break;
            }
            let start = out.len();
            out.resize(start + len, 0);
            self.inner.read_exact(&mut out[start..])?;
        }
        Ok(out)
    }

    fn read_cstring(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let b = read_u8(&mut self.inner)?;
            match b {
                0 => break,
                0x5c => {
                    let esc = read_u8(&mut self.inner)?;
                    out.push(match esc {
                        0x5c => 0x5c,
                        b'0' => 0,
                        other => other,
                    });
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }
}

fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}
