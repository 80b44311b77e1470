use crate::collective::helpers::{collective_recv_gather, collective_send};
use crate::error::Result;
use crate::group::ProcessGroup;
use crate::protocol::RpcMessage;
use crate::types::Priority;

/// Ring allgather: each rank contributes one byte buffer, the result holds
/// every contribution indexed by rank.
///
/// Uses N-1 ring rounds where each rank forwards the latest received buffer
/// to its successor. Contributions may differ in length. Each round is
/// tagged with `(epoch, step)` so a fast neighbour's next round can never be
/// mistaken for the current one.
pub(crate) async fn ring_allgather(group: &ProcessGroup, data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let world = group.world_size() as usize;
    let rank = group.rank() as usize;

    if world <= 1 {
        return Ok(vec![data.to_vec()]);
    }

    let epoch = group.next_gather_epoch();
    let mut out: Vec<Vec<u8>> = vec![Vec::new(); world];
    out[rank] = data.to_vec();

    let next = ((rank + 1) % world) as u32;
    let prev = ((rank + world - 1) % world) as u32;

    for step in 0..(world - 1) {
        let send_idx = (rank + world - step) % world;
        let recv_idx = (rank + world - step - 1) % world;

        let msg = RpcMessage::Gather {
            epoch,
            step: step as u32,
            payload: out[send_idx].clone(),
        };

        let (_, received) = tokio::try_join!(
            collective_send(group, next, &msg, Priority::Bulk, "allgather"),
            collective_recv_gather(group, prev, (epoch, step as u32), "allgather"),
        )?;

        out[recv_idx] = received;
    }

    tracing::trace!(rank, epoch, "allgather complete");
    Ok(out)
}
