use crate::error::RpcError;
use std::str::FromStr;

/// Transport the RPC agent runs on.
///
/// Only the process-group backend exists; the selector is kept so callers
/// name it explicitly, and parsing rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    ProcessGroup,
}

impl FromStr for Backend {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pg" | "process_group" => Ok(Backend::ProcessGroup),
            other => Err(RpcError::InvalidArgument(format!(
                "unknown rpc backend '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::ProcessGroup => write!(f, "pg"),
        }
    }
}
