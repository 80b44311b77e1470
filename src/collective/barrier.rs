use crate::collective::helpers::collective_send;
use crate::error::{RpcError, Result};
use crate::group::ProcessGroup;
use crate::protocol::RpcMessage;
use crate::types::{Priority, Rank};
use std::collections::HashSet;
use std::time::Duration;

/// Where this rank stands in the current barrier epoch.
///
/// Kept on the group so a barrier that timed out can be retried without
/// losing the arrivals it already consumed.
#[derive(Debug, Default)]
pub(crate) struct BarrierProgress {
    epoch: u64,
    /// Rank 0: ranks whose `Barrier` for `epoch` has been received.
    arrived: HashSet<Rank>,
    /// Other ranks: `Barrier` for `epoch` already sent to rank 0.
    announced: bool,
}

impl BarrierProgress {
    fn advance(&mut self) {
        self.epoch += 1;
        self.arrived.clear();
        self.announced = false;
    }
}

/// Barrier: blocks until all ranks reach this point.
///
/// Two-phase through rank 0:
/// - Phase 1: every rank except 0 sends `Barrier { epoch }` to rank 0.
/// - Phase 2: rank 0 waits for all of them, then sends `BarrierAck { epoch }`
///   back to everyone.
///
/// The epoch only advances once the barrier passes. A call that fails with
/// `BarrierTimeout` leaves its progress in place and the next call resumes
/// the same epoch. Messages from earlier epochs are skipped.
pub(crate) async fn barrier(group: &ProcessGroup, timeout: Option<Duration>) -> Result<()> {
    let world = group.world_size();
    if world <= 1 {
        return Ok(());
    }

    let mut progress = group.barrier_progress().lock().await;
    let epoch = progress.epoch;
    let rank = group.rank();

    if rank == 0 {
        for r in 1..world {
            if progress.arrived.contains(&r) {
                continue;
            }
            wait_for(group, r, epoch, timeout, Phase::Arrive).await?;
            progress.arrived.insert(r);
        }

        let ack = RpcMessage::BarrierAck { epoch };
        for r in 1..world {
            collective_send(group, r, &ack, Priority::Critical, "barrier").await?;
        }
    } else {
        if !progress.announced {
            let msg = RpcMessage::Barrier { epoch };
            collective_send(group, 0, &msg, Priority::Critical, "barrier").await?;
            progress.announced = true;
        }
        wait_for(group, 0, epoch, timeout, Phase::Ack).await?;
    }

    progress.advance();
    tracing::debug!(rank, epoch, "barrier passed");
    Ok(())
}

#[derive(Clone, Copy)]
enum Phase {
    Arrive,
    Ack,
}

/// Receive control messages from `src` until the one for `epoch` shows up.
async fn wait_for(
    group: &ProcessGroup,
    src: Rank,
    epoch: u64,
    timeout: Option<Duration>,
    phase: Phase,
) -> Result<()> {
    loop {
        let msg = recv_control(group, src, epoch, timeout).await?;
        let got = match (phase, &msg) {
            (Phase::Arrive, RpcMessage::Barrier { epoch: e }) => *e,
            (Phase::Ack, RpcMessage::BarrierAck { epoch: e }) => *e,
            _ => return Err(unexpected(src, phase, epoch, &msg)),
        };
        if got == epoch {
            return Ok(());
        }
        if got > epoch {
            return Err(unexpected(src, phase, epoch, &msg));
        }
        tracing::debug!(src, epoch, stale = got, "barrier: skipping stale message");
    }
}

async fn recv_control(
    group: &ProcessGroup,
    src: Rank,
    epoch: u64,
    timeout: Option<Duration>,
) -> Result<RpcMessage> {
    let received = match timeout {
        Some(t) => tokio::time::timeout(t, group.recv_control(src))
            .await
            .map_err(|_| RpcError::BarrierTimeout {
                epoch,
                timeout_ms: t.as_millis() as u64,
            })?,
        None => group.recv_control(src).await,
    };
    received.map_err(|e| RpcError::CollectiveFailed {
        operation: "barrier",
        rank: src,
        reason: e.to_string(),
    })
}

fn unexpected(src: Rank, phase: Phase, epoch: u64, got: &RpcMessage) -> RpcError {
    let expected = match phase {
        Phase::Arrive => "Barrier",
        Phase::Ack => "BarrierAck",
    };
    RpcError::CollectiveFailed {
        operation: "barrier",
        rank: src,
        reason: format!("expected {expected}(epoch={epoch}), got {got:?}"),
    }
}
