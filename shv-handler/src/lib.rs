//! A multi-stage request dispatcher bound to a [`shv_client::ShvClient`]:
//! stages are tried in order, the first to claim a message owns it, and
//! `ls`/`dir` fall back to a built-in aggregation across every stage.

mod dispatcher;
mod introspect;
mod send_gate;
mod stage;

pub use dispatcher::{Handler, Tick, IDLE_STOP};
pub use introspect::{dir_result, ls_exists, ls_result};
pub use send_gate::{SendGate, SendGuard};
pub use stage::{DirCtx, IdleCtx, LsCtx, MethodDescriptor, MethodFlags, MsgCtx, Signature, Stage, StageResult};

pub mod prelude {
    pub use crate::{
        dir_result, ls_exists, ls_result, DirCtx, Handler, IdleCtx, LsCtx, MethodDescriptor, MethodFlags, MsgCtx,
        Signature, Stage, StageResult, Tick, IDLE_STOP,
    };
}
