use std::fmt;

/// Reason an unpack operation failed to produce a valid [`crate::Item`].
///
/// Matches the `cperror` taxonomy from the SHV reference implementation,
/// renamed to the vocabulary spec.md uses (`Malformed` where the reference
/// calls it `CPERR_INVALID`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// Nothing was stored; not itself an error condition.
    #[default]
    None,
    /// The underlying stream reported end of file mid-item.
    Eof,
    /// The underlying stream reported an I/O error.
    Io,
    /// Bytes in the stream do not form a valid encoding.
    Malformed,
    /// A value's magnitude exceeds what this implementation can represent.
    Overflow,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::None => "no error",
            ErrorKind::Eof => "unexpected end of stream",
            ErrorKind::Io => "I/O error",
            ErrorKind::Malformed => "malformed data",
            ErrorKind::Overflow => "value out of supported range",
        };
        write!(f, "{s}")
    }
}

impl std::error::Error for ErrorKind {}
