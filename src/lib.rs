mod collective;
pub mod config;
pub mod error;
pub mod group;
pub mod protocol;
pub mod rpc;
pub mod session;
pub mod transport;
pub mod types;
pub mod value;

pub use config::RpcConfig;
pub use error::{Result, RpcError};
pub use group::ProcessGroup;
pub use protocol::{CallOutcome, CallPayload, RpcMessage};
pub use rpc::{
    BuiltinOp, CallFailure, CallState, CompletionHandle, FunctionRegistry, NameTable, RpcAgent,
    Target, UserFunction,
};
pub use session::{Backend, CallResult, Session, SyncSession};
pub use transport::{PeerConnection, TransportListener};
pub use types::{Priority, Rank, WorkerId};
pub use value::{Kwargs, Value};
