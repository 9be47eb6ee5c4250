//! Packers for the request/response/signal/error message shapes. Each
//! writes the `Meta` envelope and opens the `IMap` content, leaving the
//! stream positioned for the caller to pack `Param`/`Result` (by
//! [`imap_key::PARAM`]/[`imap_key::RESULT`]) before closing the container.

use std::fmt;
use std::io::{self, Write};

use shv_chainpack::Packer;
use shv_value::AccessLevel;

use crate::error::ErrorCode;
use crate::meta::{imap_key, tag, MESSAGE_TYPE_ID};

/// Addressing and access fields shared by requests.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta<'a> {
    pub request_id: i64,
    pub path: &'a str,
    pub method: &'a str,
    pub caller_ids: &'a [i64],
    pub access_level: Option<AccessLevel>,
    pub access_granted: Option<&'a str>,
    pub user_id: Option<&'a str>,
}

fn write_caller_ids<W: Write>(p: &mut Packer<W>, caller_ids: &[i64]) -> io::Result<()> {
    if caller_ids.is_empty() {
        return Ok(());
    }
    p.pack_int(tag::CALLER_IDS)?;
    p.list_begin()?;
    for id in caller_ids {
        p.pack_int(*id)?;
    }
    p.container_end()?;
    Ok(())
}

/// Packs a request's `Meta` alone, without opening its `IMap` — for a
/// broker forwarding a request that wants to retransmit the original
/// `IMap` content verbatim instead of rebuilding it.
pub fn request_meta_only<W: Write>(p: &mut Packer<W>, m: &RequestMeta<'_>) -> io::Result<()> {
    p.meta_begin()?;
    p.pack_int(tag::META_TYPE_ID)?;
    p.pack_int(MESSAGE_TYPE_ID)?;
    p.pack_int(tag::REQUEST_ID)?;
    p.pack_int(m.request_id)?;
    if !m.path.is_empty() {
        p.pack_int(tag::SHV_PATH)?;
        p.pack_string(m.path)?;
    }
    p.pack_int(tag::METHOD)?;
    p.pack_string(m.method)?;
    write_caller_ids(p, m.caller_ids)?;
    if let Some(level) = m.access_level {
        p.pack_int(tag::ACCESS_LEVEL)?;
        p.pack_int(level as i64)?;
    }
    if let Some(granted) = m.access_granted {
        p.pack_int(tag::ACCESS_GRANTED)?;
        p.pack_string(granted)?;
    }
    if let Some(user_id) = m.user_id {
        p.pack_int(tag::USER_ID)?;
        p.pack_string(user_id)?;
    }
    p.container_end()?;
    Ok(())
}

/// Packs a request's `Meta` and opens its `IMap`; the caller writes
/// `Param` (if any) then `container_end()`.
pub fn request<W: Write>(p: &mut Packer<W>, m: &RequestMeta<'_>) -> io::Result<()> {
    request_meta_only(p, m)?;
    p.imap_begin()?;
    Ok(())
}

/// A request with no `Param`, for methods that take no argument.
pub fn request_void<W: Write>(p: &mut Packer<W>, m: &RequestMeta<'_>) -> io::Result<()> {
    request(p, m)?;
    p.container_end()?;
    Ok(())
}

/// Packs a signal's `Meta` and opens its `IMap`; the caller writes
/// `Param` then `container_end()`.
pub fn signal<W: Write>(
    p: &mut Packer<W>,
    path: &str,
    source: &str,
    signal_name: &str,
    access_level: AccessLevel,
) -> io::Result<()> {
    p.meta_begin()?;
    p.pack_int(tag::META_TYPE_ID)?;
    p.pack_int(MESSAGE_TYPE_ID)?;
    if !path.is_empty() {
        p.pack_int(tag::SHV_PATH)?;
        p.pack_string(path)?;
    }
    p.pack_int(tag::METHOD)?;
    p.pack_string(signal_name)?;
    if source != "get" {
        p.pack_int(tag::SOURCE)?;
        p.pack_string(source)?;
    }
    if access_level != AccessLevel::Read {
        p.pack_int(tag::ACCESS_LEVEL)?;
        p.pack_int(access_level as i64)?;
    }
    p.container_end()?;
    p.imap_begin()?;
    Ok(())
}

/// Shortcut for `signal(path, "get", "chng", Read)`, the common
/// value-changed notification.
pub fn chng<W: Write>(p: &mut Packer<W>, path: &str) -> io::Result<()> {
    signal(p, path, "get", "chng", AccessLevel::Read)
}

/// Packs a response's `Meta` alone, without opening its `IMap` — for a
/// broker relaying a response/error back toward its caller with `CallerIds`
/// popped, retransmitting the original `Result`/`Error` content verbatim.
pub fn response_meta_only<W: Write>(p: &mut Packer<W>, request_id: i64, caller_ids: &[i64]) -> io::Result<()> {
    p.meta_begin()?;
    p.pack_int(tag::META_TYPE_ID)?;
    p.pack_int(MESSAGE_TYPE_ID)?;
    p.pack_int(tag::REQUEST_ID)?;
    p.pack_int(request_id)?;
    write_caller_ids(p, caller_ids)?;
    p.container_end()?;
    Ok(())
}

/// Packs a response's `Meta` and opens its `IMap`; the caller writes
/// `Result` then `container_end()`.
pub fn response<W: Write>(p: &mut Packer<W>, request_id: i64, caller_ids: &[i64]) -> io::Result<()> {
    response_meta_only(p, request_id, caller_ids)?;
    p.imap_begin()?;
    Ok(())
}

/// A response with no result value.
pub fn response_void<W: Write>(p: &mut Packer<W>, request_id: i64, caller_ids: &[i64]) -> io::Result<()> {
    response(p, request_id, caller_ids)?;
    p.container_end()?;
    Ok(())
}

/// Packs a complete error response: `Meta` plus an `IMap` holding a single
/// `Error` entry `{1: code, 2: message}`.
pub fn error<W: Write>(p: &mut Packer<W>, request_id: i64, caller_ids: &[i64], code: i64, message: &str) -> io::Result<()> {
    response(p, request_id, caller_ids)?;
    p.pack_int(imap_key::ERROR)?;
    p.imap_begin()?;
    p.pack_int(1)?;
    p.pack_int(code)?;
    p.pack_int(2)?;
    p.pack_string(message)?;
    p.container_end()?;
    p.container_end()?;
    Ok(())
}

/// `error()` taking a named [`ErrorCode`] and pre-formatted arguments.
pub fn ferror<W: Write>(p: &mut Packer<W>, request_id: i64, caller_ids: &[i64], code: ErrorCode, args: fmt::Arguments<'_>) -> io::Result<()> {
    error(p, request_id, caller_ids, code.as_i64(), &args.to_string())
}
