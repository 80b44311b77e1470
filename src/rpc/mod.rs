mod agent;
mod builtin;
pub(crate) mod dispatcher;
mod functions;
mod future;
mod names;
mod pending;
mod udf;

pub use agent::RpcAgent;
pub use builtin::BuiltinOp;
pub use dispatcher::Target;
pub use functions::{FunctionRegistry, UserFunction};
pub use future::{CallFailure, CallState, CompletionHandle};
pub use names::NameTable;
pub use udf::{UserCall, deserialize_call, serialize_call};
