use std::fmt::Write as _;
use std::io::{self, Read};

use shv_value::{Chunk, DateTime, Decimal, ErrorKind, Item};

/// One level of container nesting while writing CPON, tracking whether a
/// separator is due and (for Map/IMap/Meta) whether the next item is a key
/// or a value. Mirrors `struct cpon_state_ctx` in the reference
/// implementation, minus the meta-just-closed bit (handled inline here).
struct Frame {
    kind: ContainerKind,
    count: usize,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum ContainerKind {
    List,
    Map,
    IMap,
    Meta,
}

impl ContainerKind {
    fn is_paired(self) -> bool {
        !matches!(self, ContainerKind::List)
    }
}

/// Writes [`Item`]s as CPON text.
pub struct CponWriter<W> {
    inner: W,
    stack: Vec<Frame>,
    indent: Option<&'static str>,
}

impl<W: io::Write> CponWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, stack: Vec::new(), indent: None }
    }

    pub fn with_indent(inner: W, indent: &'static str) -> Self {
        Self { inner, stack: Vec::new(), indent: Some(indent) }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn pack(&mut self, item: &Item) -> io::Result<usize> {
        let mut out = String::new();
        self.write_separator(&mut out, item);
        self.write_item(&mut out, item);
        self.inner.write_all(out.as_bytes())?;
        Ok(out.len())
    }

    fn write_separator(&mut self, out: &mut String, item: &Item) {
        if matches!(item, Item::ContainerEnd) {
            if let Some(indent) = self.indent {
                if let Some(frame) = self.stack.last() {
                    if frame.count > 0 {
                        out.push('\n');
                        for _ in 0..self.stack.len() - 1 {
                            out.push_str(indent);
                        }
                    }
                }
            }
            return;
        }
        if let Some(frame) = self.stack.last_mut() {
            let is_colon = frame.kind.is_paired() && frame.count % 2 == 1;
            if frame.count > 0 {
                out.push_str(if is_colon { ":" } else { "," });
            }
            if !is_colon {
                if let Some(indent) = self.indent {
                    out.push('\n');
                    for _ in 0..self.stack.len() {
                        out.push_str(indent);
                    }
                }
            }
            frame.count += 1;
        }
    }

    fn write_item(&mut self, out: &mut String, item: &Item) {
        match item {
            Item::Null => out.push_str("null"),
            Item::Bool(true) => out.push_str("true"),
            Item::Bool(false) => out.push_str("false"),
            Item::Int(v) => {
                let _ = write!(out, "{v}");
            }
            Item::UInt(v) => {
                let _ = write!(out, "{v}u");
            }
            Item::Double(d) => {
                let _ = write!(out, "{d}");
                if !out.ends_with('.') && !out.contains('.') && !out.contains('e') && !out.contains("inf") && !out.contains("NaN") {
                    out.push_str(".0");
                }
            }
            Item::Decimal(d) => {
                let _ = write!(out, "{d}");
            }
            Item::DateTime(dt) => {
                let _ = write!(out, "d\"{dt}\"");
            }
            Item::Blob(chunk) => {
                out.push_str("b\"");
                escape_bytes(&chunk.data, out);
                out.push('"');
            }
            Item::String(chunk) => {
                out.push('"');
                escape_bytes(&chunk.data, out);
                out.push('"');
            }
            Item::List => {
                out.push('[');
                self.stack.push(Frame { kind: ContainerKind::List, count: 0 });
            }
            Item::Map => {
                out.push('{');
                self.stack.push(Frame { kind: ContainerKind::Map, count: 0 });
            }
            Item::IMap => {
                out.push_str("i{");
                self.stack.push(Frame { kind: ContainerKind::IMap, count: 0 });
            }
            Item::Meta => {
                out.push('<');
                self.stack.push(Frame { kind: ContainerKind::Meta, count: 0 });
            }
            Item::ContainerEnd => {
                let closed = self.stack.pop();
                out.push(match closed.map(|f| f.kind) {
                    Some(ContainerKind::List) => ']',
                    Some(ContainerKind::Map) | Some(ContainerKind::IMap) => '}',
                    Some(ContainerKind::Meta) => '>',
                    None => '?',
                });
            }
            Item::Invalid(_) => out.push_str("null"),
        }
    }
}

fn escape_bytes(data: &[u8], out: &mut String) {
    for &b in data {
        match b {
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            0x08 => out.push_str("\\b"),
            0x0c => out.push_str("\\f"),
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0 => out.push_str("\\0"),
            0x20..=0x7e => out.push(b as char),
            other => {
                let _ = write!(out, "\\x{other:02x}");
            }
        }
    }
}

/// Reads [`Item`]s from CPON text.
///
/// Buffers the whole input up front: CPON needs lookahead that a pure
/// `Read` adapter cannot give cheaply, and protocol messages are bounded in
/// size in practice (as they are for the reference implementation's
/// allocation-bounded parser).
pub struct CponReader {
    buf: Vec<u8>,
    pos: usize,
}

impl CponReader {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn from_reader<R: Read>(mut r: R) -> io::Result<Self> {
        let mut buf = Vec::new();
        r.read_to_end(&mut buf)?;
        Ok(Self::new(buf))
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() || b == b',' || b == b':' => {
                    self.pos += 1;
                }
                Some(b'/') if self.buf.get(self.pos + 1) == Some(&b'/') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.buf.get(self.pos + 1) == Some(&b'*') => {
                    self.pos += 2;
                    while self.pos < self.buf.len() && !(self.buf[self.pos] == b'*' && self.buf.get(self.pos + 1) == Some(&b'/')) {
                        self.pos += 1;
                    }
                    self.pos = (self.pos + 2).min(self.buf.len());
                }
                _ => break,
            }
        }
    }

    pub fn unpack(&mut self) -> io::Result<Item> {
        self.skip_trivia();
        let Some(b) = self.peek() else { return Ok(Item::Invalid(ErrorKind::Eof)) };
        match b {
            b']' | b'}' | b'>' => {
                self.pos += 1;
                Ok(Item::ContainerEnd)
            }
            b'[' => {
                self.pos += 1;
                Ok(Item::List)
            }
            b'{' => {
                self.pos += 1;
                Ok(Item::Map)
            }
            b'<' => {
                self.pos += 1;
                Ok(Item::Meta)
            }
            b'"' => self.read_string(),
            b'd' if self.buf.get(self.pos + 1) == Some(&b'"') => self.read_datetime(),
            b'b' if self.buf.get(self.pos + 1) == Some(&b'"') => self.read_escaped_blob(),
            b'x' if self.buf.get(self.pos + 1) == Some(&b'"') => self.read_hex_blob(),
            b'i' if self.buf.get(self.pos + 1) == Some(&b'{') => {
                self.pos += 2;
                Ok(Item::IMap)
            }
            b'a' if self.buf.get(self.pos + 1) == Some(&b'[') => {
                self.pos += 2;
                Ok(Item::List)
            }
            b't' if self.buf[self.pos..].starts_with(b"true") => {
                self.pos += 4;
                Ok(Item::Bool(true))
            }
            b'f' if self.buf[self.pos..].starts_with(b"false") => {
                self.pos += 5;
                Ok(Item::Bool(false))
            }
            b'n' if self.buf[self.pos..].starts_with(b"null") => {
                self.pos += 4;
                Ok(Item::Null)
            }
            b'-' | b'0'..=b'9' => self.read_number(),
            _ => Ok(Item::Invalid(ErrorKind::Malformed)),
        }
    }

    fn read_string(&mut self) -> io::Result<Item> {
        let bytes = self.read_quoted()?;
        Ok(Item::String(Chunk::whole(bytes)))
    }

    fn read_escaped_blob(&mut self) -> io::Result<Item> {
        self.pos += 1; // 'b'
        let bytes = self.read_quoted()?;
        Ok(Item::Blob(Chunk::whole(bytes)))
    }

    fn read_hex_blob(&mut self) -> io::Result<Item> {
        self.pos += 2; // 'x"'
        let mut out = Vec::new();
        loop {
            match self.bump() {
                Some(b'"') => break,
                Some(hi) => {
                    let lo = self.bump().ok_or_else(eof)?;
                    out.push(hex_val(hi)? << 4 | hex_val(lo)?);
                }
                None => return Err(eof()),
            }
        }
        Ok(Item::Blob(Chunk::whole(out)))
    }

    fn read_quoted(&mut self) -> io::Result<Vec<u8>> {
        self.pos += 1; // opening quote
        let mut out = Vec::new();
        loop {
            match self.bump().ok_or_else(eof)? {
                b'"' => break,
                b'\\' => {
                    let esc = self.bump().ok_or_else(eof)?;
                    out.push(match esc {
                        b't' => b'\t',
                        b'r' => b'\r',
                        b'n' => b'\n',
                        b'b' => 0x08,
                        b'f' => 0x0c,
                        b'"' => b'"',
                        b'\\' => b'\\',
                        b'0' => 0,
                        other => other,
                    });
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }

    fn read_datetime(&mut self) -> io::Result<Item> {
        self.pos += 1; // 'd'
        let raw = self.read_quoted()?;
        let s = String::from_utf8(raw).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-utf8 datetime"))?;
        parse_datetime(&s).map(Item::DateTime).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed datetime"))
    }

    fn read_number(&mut self) -> io::Result<Item> {
        let start = self.pos;
        let neg = self.peek() == Some(b'-');
        if neg {
            self.pos += 1;
        }
        let int_start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        let int_end = self.pos;

        let mut has_dot = false;
        let mut frac_digits = 0usize;
        let mut frac_start = self.pos;
        if self.peek() == Some(b'.') {
            has_dot = true;
            self.pos += 1;
            frac_start = self.pos;
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
            frac_digits = self.pos - frac_start;
        }
        let frac_end = self.pos;

        let mut explicit_exp = 0i32;
        let mut has_exp = false;
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            has_exp = true;
            self.pos += 1;
            let exp_start = self.pos;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
            explicit_exp = std::str::from_utf8(&self.buf[exp_start..self.pos]).ok().and_then(|s| s.parse().ok()).unwrap_or(0);
        }
        let is_decimal = has_dot || has_exp;
        let is_uint = !is_decimal && self.peek() == Some(b'u');
        if is_uint {
            self.pos += 1;
        }

        if is_decimal {
            let int_part = std::str::from_utf8(&self.buf[int_start..int_end]).unwrap_or("0");
            let frac_part = std::str::from_utf8(&self.buf[frac_start..frac_end]).unwrap_or("");
            let combined = format!("{int_part}{frac_part}");
            let mantissa: i64 = combined.parse().unwrap_or(0) * if neg { -1 } else { 1 };
            let exponent = explicit_exp - frac_digits as i32;
            Ok(Item::Decimal(Decimal::new(mantissa, exponent).normalized()))
        } else if is_uint {
            let text = std::str::from_utf8(&self.buf[int_start..int_end]).unwrap_or("0");
            text.parse::<u64>().map(Item::UInt).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad uint"))
        } else {
            let text = std::str::from_utf8(&self.buf[start..int_end]).unwrap_or("0");
            text.parse::<i64>().map(Item::Int).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad int"))
        }
    }
}

fn hex_val(b: u8) -> io::Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(io::Error::new(io::ErrorKind::InvalidData, "bad hex digit")),
    }
}

fn eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "unterminated CPON literal")
}

/// Parses `YYYY-MM-DDTHH:MM:SS[.mmm](Z|±HH:MM)`.
fn parse_datetime(s: &str) -> Option<DateTime> {
    let bytes = s.as_bytes();
    if bytes.len() < 19 {
        return None;
    }
    let year: i64 = s.get(0..4)?.parse().ok()?;
    let month: i64 = s.get(5..7)?.parse().ok()?;
    let day: i64 = s.get(8..10)?.parse().ok()?;
    let hour: i64 = s.get(11..13)?.parse().ok()?;
    let minute: i64 = s.get(14..16)?.parse().ok()?;
    let second: i64 = s.get(17..19)?.parse().ok()?;
    let mut rest = &s[19..];
    let mut ms = 0i64;
    if let Some(stripped) = rest.strip_prefix('.') {
        let digits: String = stripped.chars().take_while(|c| c.is_ascii_digit()).collect();
        ms = format!("{digits:0<3}")[..3].parse().ok()?;
        rest = &stripped[digits.len()..];
    }
    let offset_minutes = if rest.is_empty() || rest == "Z" {
        0
    } else if let Some(tail) = rest.strip_prefix('+') {
        parse_offset(tail)?
    } else if let Some(tail) = rest.strip_prefix('-') {
        -parse_offset(tail)?
    } else {
        0
    };
    let days = days_from_civil(year, month, day);
    let msecs = days * 86_400_000 + hour * 3_600_000 + minute * 60_000 + second * 1000 + ms;
    Some(DateTime::new(msecs, offset_minutes))
}

fn parse_offset(tail: &str) -> Option<i32> {
    let h: i32 = tail.get(0..2)?.parse().ok()?;
    let m: i32 = tail.get(3..5)?.parse().ok()?;
    Some(h * 60 + m)
}

/// Howard Hinnant's `days_from_civil`.
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u64;
    let mp = ((m + 9) % 12) as u64;
    let doy = (153 * mp + 2) / 5 + d as u64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe as i64 - 719468
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(item: Item) {
        let mut buf = Vec::new();
        let mut w = CponWriter::new(&mut buf);
        w.pack(&item).unwrap();
        let mut r = CponReader::new(buf.clone());
        let got = r.unpack().unwrap();
        assert_eq!(got, item, "cpon was {:?}", String::from_utf8_lossy(&buf));
    }

    #[test]
    fn scalars_roundtrip() {
        roundtrip(Item::Null);
        roundtrip(Item::Bool(true));
        roundtrip(Item::Bool(false));
        roundtrip(Item::Int(-7));
        roundtrip(Item::UInt(7));
        roundtrip(Item::String(Chunk::whole(b"hi".to_vec())));
    }

    #[test]
    fn decimal_roundtrips() {
        roundtrip(Item::Decimal(Decimal::new(314, -2)));
    }

    #[test]
    fn uint_has_u_suffix() {
        let mut buf = Vec::new();
        let mut w = CponWriter::new(&mut buf);
        w.pack(&Item::UInt(42)).unwrap();
        assert_eq!(buf, b"42u");
    }

    #[test]
    fn map_with_colon_and_comma() {
        let mut buf = Vec::new();
        let mut w = CponWriter::new(&mut buf);
        w.pack(&Item::Map).unwrap();
        w.pack(&Item::String(Chunk::whole(b"answer".to_vec()))).unwrap();
        w.pack(&Item::Int(42)).unwrap();
        w.pack(&Item::ContainerEnd).unwrap();
        assert_eq!(buf, br#"{"answer":42}"#);
    }

    #[test]
    fn request_scenario_roundtrips() {
        // spec.md scenario 6
        let cpon = br#"<8:42,9:".app",10:"ping">i{1:null}"#.to_vec();
        let mut r = CponReader::new(cpon);
        assert_eq!(r.unpack().unwrap(), Item::Meta);
        assert_eq!(r.unpack().unwrap(), Item::Int(8));
        assert_eq!(r.unpack().unwrap(), Item::Int(42));
        assert_eq!(r.unpack().unwrap(), Item::Int(9));
        assert_eq!(r.unpack().unwrap(), Item::String(Chunk::whole(b".app".to_vec())));
        assert_eq!(r.unpack().unwrap(), Item::Int(10));
        assert_eq!(r.unpack().unwrap(), Item::String(Chunk::whole(b"ping".to_vec())));
        assert_eq!(r.unpack().unwrap(), Item::ContainerEnd);
        assert_eq!(r.unpack().unwrap(), Item::IMap);
        assert_eq!(r.unpack().unwrap(), Item::Int(1));
        assert_eq!(r.unpack().unwrap(), Item::Null);
        assert_eq!(r.unpack().unwrap(), Item::ContainerEnd);
    }

    #[test]
    fn hex_blob_decodes() {
        let mut r = CponReader::new(br#"x"a2a3a4aa""#.to_vec());
        assert_eq!(r.unpack().unwrap(), Item::Blob(Chunk::whole(vec![0xa2, 0xa3, 0xa4, 0xaa])));
    }

    #[test]
    fn datetime_roundtrips() {
        let dt = DateTime::new(1_700_000_000_123, 60);
        roundtrip(Item::DateTime(dt));
    }

    #[test]
    fn comments_and_whitespace_are_ignored() {
        let mut r = CponReader::new(b"/* c */ 42 // trailing\n".to_vec());
        assert_eq!(r.unpack().unwrap(), Item::Int(42));
    }
}
