//! Facade over the SHV RPC stack: pulls the data model, codecs, transport
//! framing, client, handler, broker, and connection-URL crates behind one
//! dependency, the way the teacher's own top-level facade re-exports its
//! workspace.

pub use shv_broker as broker;
pub use shv_chainpack as chainpack;
pub use shv_client as client;
pub use shv_handler as handler;
pub use shv_proto as proto;
pub use shv_transport as transport;
pub use shv_url as url;
pub use shv_value as value;

pub mod prelude {
    pub use shv_broker::prelude::*;
    pub use shv_chainpack::{Packer, Unpacker};
    pub use shv_client::{ControlOp, LoginOptions, LoginResult, PasswordKind, ShvClient};
    pub use shv_handler::prelude::*;
    pub use shv_proto::{ErrorCode, Meta, RequestMeta, RpcError};
    pub use shv_transport::Transport;
    pub use shv_url::{parse as parse_url, Credential, Scheme, ShvUrl};
    pub use shv_value::{AccessLevel, DateTime, Decimal, Item};
}
