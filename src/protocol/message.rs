use crate::protocol::header::MessageType;
use crate::types::Rank;
use crate::value::Value;

/// Messages exchanged between rankcall workers.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub enum RpcMessage {
    /// First message on every mesh connection: identifies the connecting rank.
    Hello { protocol_version: u16, rank: Rank },

    /// One all-gather contribution. `epoch` identifies the collective call,
    /// `step` the ring round inside it.
    Gather {
        epoch: u64,
        step: u32,
        payload: Vec<u8>,
    },

    /// Barrier request: all ranks must reach this epoch before proceeding.
    Barrier { epoch: u64 },

    /// Barrier acknowledgement from rank 0.
    BarrierAck { epoch: u64 },

    /// Remote call request.
    Request { req_id: u64, call: CallPayload },

    /// Response to a `Request`, tagged with the caller's `req_id`.
    Response { req_id: u64, outcome: CallOutcome },
}

impl RpcMessage {
    /// Header category for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            RpcMessage::Hello { .. }
            | RpcMessage::Barrier { .. }
            | RpcMessage::BarrierAck { .. } => MessageType::Control,
            RpcMessage::Request { .. } | RpcMessage::Response { .. } => MessageType::Rpc,
            RpcMessage::Gather { .. } => MessageType::Gather,
        }
    }
}

/// What a request asks the remote worker to run.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub enum CallPayload {
    /// A built-in operation addressed by its qualified name (`aten::add`).
    Builtin {
        qualified_name: String,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    },
    /// A user function call, serialized into an opaque blob.
    User { blob: Vec<u8> },
}

impl CallPayload {
    /// Name used in logs: the qualified name, or `<udf>` for user calls.
    pub fn label(&self) -> &str {
        match self {
            CallPayload::Builtin { qualified_name, .. } => qualified_name,
            CallPayload::User { .. } => "<udf>",
        }
    }
}

/// Result of executing a request on the remote side.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Value(Value),
    Error(String),
}
