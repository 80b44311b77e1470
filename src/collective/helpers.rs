use crate::error::{RpcError, Result};
use crate::group::ProcessGroup;
use crate::protocol::RpcMessage;
use crate::transport::router::GatherKey;
use crate::types::{Priority, Rank};

/// Send a collective message to a peer with timeout, wrapping errors as
/// `CollectiveFailed`.
pub(crate) async fn collective_send(
    group: &ProcessGroup,
    dest: Rank,
    msg: &RpcMessage,
    priority: Priority,
    operation: &'static str,
) -> Result<()> {
    let timeout = group.config().collective_timeout;
    match tokio::time::timeout(timeout, group.send_message(dest, msg, priority)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RpcError::CollectiveFailed {
            operation,
            rank: dest,
            reason: e.to_string(),
        }),
        Err(_) => Err(RpcError::CollectiveFailed {
            operation,
            rank: dest,
            reason: format!("send timed out after {}ms", timeout.as_millis()),
        }),
    }
}

/// Receive one all-gather contribution with timeout, wrapping errors as
/// `CollectiveFailed`.
pub(crate) async fn collective_recv_gather(
    group: &ProcessGroup,
    src: Rank,
    key: GatherKey,
    operation: &'static str,
) -> Result<Vec<u8>> {
    let timeout = group.config().collective_timeout;
    match tokio::time::timeout(timeout, group.recv_gather(src, key)).await {
        Ok(Ok(buf)) => Ok(buf),
        Ok(Err(e)) => Err(RpcError::CollectiveFailed {
            operation,
            rank: src,
            reason: e.to_string(),
        }),
        Err(_) => Err(RpcError::CollectiveFailed {
            operation,
            rank: src,
            reason: format!(
                "recv of epoch {} step {} timed out after {}ms",
                key.0,
                key.1,
                timeout.as_millis()
            ),
        }),
    }
}
