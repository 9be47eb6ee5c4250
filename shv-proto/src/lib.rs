//! Message envelope, meta tags, and error taxonomy on top of
//! [`shv_chainpack`]'s generic pack/unpack facade.

mod error;
mod message;
mod meta;

pub use error::{ErrorCode, RpcError};
pub use message::{
    chng, error as pack_error, ferror, request, request_meta_only, request_void, response, response_meta_only, response_void, signal,
    RequestMeta,
};
pub use meta::{find_imap_field, imap_key, read_meta, split_meta, tag, Kind, Limits, Meta, MESSAGE_TYPE_ID};

pub mod prelude {
    pub use crate::{
        chng, ferror, find_imap_field, pack_error, read_meta, request, request_void, response, response_void, signal,
        ErrorCode, Kind, Limits, Meta, RequestMeta, RpcError,
    };
}
