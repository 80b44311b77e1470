use crate::types::Rank;

pub type Result<T> = std::result::Result<T, RpcError>;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC has not been initialized: call initialize(name) first")]
    NotInitialized,

    #[error("RPC is already initialized")]
    AlreadyInitialized,

    #[error("unknown worker name {name:?}")]
    NotFound { name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("remote call on {worker} failed: {message}")]
    RemoteExecution { worker: String, message: String },

    #[error("sync() is already running on another task of this worker")]
    ConcurrentSync,

    #[error("connection to rank {rank} failed: {reason}")]
    ConnectionFailed { rank: Rank, reason: String },

    #[error("peer {rank} disconnected unexpectedly")]
    PeerDisconnected { rank: Rank },

    #[error("rank {rank} not found in process group")]
    UnknownPeer { rank: Rank },

    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("protocol version mismatch: local={local}, remote={remote}")]
    ProtocolMismatch { local: u16, remote: u16 },

    #[error("message decode failed: {0}")]
    DecodeFailed(String),

    #[error("message encode failed: {0}")]
    EncodeFailed(String),

    #[error("{operation} failed at rank {rank}: {reason}")]
    CollectiveFailed {
        operation: &'static str,
        rank: Rank,
        reason: String,
    },

    #[error("barrier timed out after {timeout_ms}ms (epoch {epoch})")]
    BarrierTimeout { epoch: u64, timeout_ms: u64 },

    #[error("mesh formation timed out: {connected}/{expected} peers connected")]
    MeshFormationTimeout { connected: u32, expected: u32 },

    #[error("QUIC transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl RpcError {
    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }
}
