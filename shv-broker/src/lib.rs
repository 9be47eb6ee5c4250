//! A multi-peer broker built on [`shv_handler`]'s stage dispatch: login and
//! role-based access, mount-table forwarding decisions, and RPC-RI
//! subscription fanout, all guarded by one shared [`BrokerState`].

mod access;
mod cidset;
mod config;
mod login;
mod mount;
mod registry;
mod ri;
mod rpc;
mod role;
mod serve;
mod state;
mod subscription;

pub use access::AccessStage;
pub use cidset::CidSet;
pub use config::{AutoSetup, BrokerConfig, UserAuth};
pub use login::{LoginAttempt, LoginCallback, LoginStage, TableLoginCallback};
pub use mount::{MountError, MountTable};
pub use registry::PeerRegistry;
pub use ri::RiPattern;
pub use rpc::{matching_recipients, pop_caller_id, resolve_forward, ForwardTarget, RpcStage};
pub use role::{AccessGrant, Role};
pub use serve::serve_connection;
pub use state::{BrokerState, PeerRecord, CID_QUARANTINE_SECS};
pub use subscription::SubscriptionTable;

pub mod prelude {
    pub use crate::{
        AccessStage, BrokerConfig, BrokerState, CidSet, ForwardTarget, LoginAttempt, LoginCallback, LoginStage,
        MountError, MountTable, PeerRecord, PeerRegistry, Role, RpcStage, SubscriptionTable, TableLoginCallback,
    };
}
