use sha1::{Digest, Sha1};

/// Whether [`LoginOptions::password`] is the plaintext password or an
/// already-SHA-1-hashed (lower-hex) digest of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordKind {
    Plain,
    Sha1,
}

#[derive(Debug, Clone)]
pub struct LoginOptions<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub password_kind: PasswordKind,
    pub device_id: Option<&'a str>,
    pub device_mount_point: Option<&'a str>,
}

pub(crate) fn sha1_hex(bytes: &[u8]) -> String {
    let digest = Sha1::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        write!(out, "{byte:02x}").unwrap();
    }
    out
}

/// `sha1(password_or_sha1(password) ++ nonce)`, lower-hex.
pub(crate) fn login_response(opts: &LoginOptions<'_>, nonce: &str) -> String {
    let password_digest = match opts.password_kind {
        PasswordKind::Plain => sha1_hex(opts.password.as_bytes()),
        PasswordKind::Sha1 => opts.password.to_string(),
    };
    sha1_hex(format!("{password_digest}{nonce}").as_bytes())
}
