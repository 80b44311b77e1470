use crate::error::{RpcError, Result};
use crate::protocol::CallPayload;
use crate::rpc::builtin::BuiltinOp;
use crate::rpc::functions::FunctionRegistry;
use crate::rpc::udf::serialize_call;
use crate::types::{Rank, WorkerId};
use crate::value::{Kwargs, Value};

/// Destination of a call: a worker name or a worker id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Name(String),
    Id(Rank),
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::Name(name.to_owned())
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Target::Name(name)
    }
}

impl From<Rank> for Target {
    fn from(id: Rank) -> Self {
        Target::Id(id)
    }
}

impl From<&WorkerId> for Target {
    fn from(worker: &WorkerId) -> Self {
        Target::Id(worker.id)
    }
}

impl From<WorkerId> for Target {
    fn from(worker: WorkerId) -> Self {
        Target::Id(worker.id)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Name(name) => write!(f, "{name}"),
            Target::Id(id) => write!(f, "#{id}"),
        }
    }
}

/// Turn a function reference plus arguments into a wire payload.
///
/// Built-ins are matched by qualified name and travel as-is; anything else
/// must be a registered user function and is serialized into an opaque
/// blob. Unknown or empty names fail with `InvalidArgument` before any
/// network activity.
pub(crate) fn build_payload(
    function: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
    functions: &FunctionRegistry,
) -> Result<CallPayload> {
    if function.is_empty() {
        return Err(RpcError::InvalidArgument(
            "function name must not be empty".into(),
        ));
    }

    if let Some(op) = BuiltinOp::from_qualified_name(function) {
        return Ok(CallPayload::Builtin {
            qualified_name: op.qualified_name().to_owned(),
            args,
            kwargs: kwargs.into_iter().collect(),
        });
    }

    if functions.contains(function)? {
        return Ok(CallPayload::User {
            blob: serialize_call(function, &args, &kwargs)?,
        });
    }

    Err(RpcError::InvalidArgument(format!(
        "'{function}' is neither a built-in nor a registered function"
    )))
}
