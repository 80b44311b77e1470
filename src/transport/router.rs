use crate::error::{RpcError, Result};
use crate::protocol::RpcMessage;
use crate::transport::connection::read_framed_stream;
use crate::types::Rank;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot};

/// Channel capacity per message lane.
const LANE_CAPACITY: usize = 256;

/// Maximum number of concurrent in-flight stream reader tasks per peer.
const MAX_CONCURRENT_STREAMS: usize = 512;

/// Key of one all-gather contribution: (epoch, ring step).
pub(crate) type GatherKey = (u64, u32);

/// A gather slot is filled by whichever side shows up first: the router
/// when the payload arrives, or the collective when it starts waiting.
enum GatherSlot {
    Arrived(Vec<u8>),
    Waiting(oneshot::Sender<Vec<u8>>),
}

type GatherMailbox = Arc<Mutex<HashMap<GatherKey, GatherSlot>>>;

/// A demultiplexer that runs a single receive loop on a QUIC connection and
/// routes incoming messages to typed lanes.
///
/// # Lanes
///
/// - **`rpc`**: `Request` and `Response` frames, consumed by the RPC agent
/// - **`control`**: `Barrier`, `BarrierAck`, late `Hello`
/// - **gather mailbox**: `Gather` payloads keyed by `(epoch, step)`, so ring
///   rounds that arrive out of order are never confused
pub struct PeerRouter {
    rank: Rank,
    rpc: Mutex<mpsc::Receiver<RpcMessage>>,
    control: Mutex<mpsc::Receiver<RpcMessage>>,
    gather: GatherMailbox,
}

/// Senders held by the background receive loop. Cloned into per-stream tasks.
#[derive(Clone)]
struct RouterSenders {
    rank: Rank,
    rpc: mpsc::Sender<RpcMessage>,
    control: mpsc::Sender<RpcMessage>,
    gather: GatherMailbox,
}

impl PeerRouter {
    /// Spawn a background receive loop for `conn` and return the router.
    pub fn spawn(
        rank: Rank,
        conn: quinn::Connection,
    ) -> (Self, tokio::task::JoinHandle<Result<()>>) {
        let (rpc_tx, rpc_rx) = mpsc::channel(LANE_CAPACITY);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(LANE_CAPACITY);
        let gather: GatherMailbox = Arc::new(Mutex::new(HashMap::new()));

        let senders = RouterSenders {
            rank,
            rpc: rpc_tx,
            control: ctrl_tx,
            gather: Arc::clone(&gather),
        };

        let handle = tokio::spawn(accept_loop(conn, senders));

        let router = Self {
            rank,
            rpc: Mutex::new(rpc_rx),
            control: Mutex::new(ctrl_rx),
            gather,
        };

        (router, handle)
    }

    /// Receive the next frame from the rpc lane.
    pub async fn recv_rpc(&self) -> Result<RpcMessage> {
        self.rpc
            .lock()
            .await
            .recv()
            .await
            .ok_or(RpcError::PeerDisconnected { rank: self.rank })
    }

    /// Receive the next message from the control lane.
    pub async fn recv_control(&self) -> Result<RpcMessage> {
        self.control
            .lock()
            .await
            .recv()
            .await
            .ok_or(RpcError::PeerDisconnected { rank: self.rank })
    }

    /// Wait for the gather payload with the given key.
    pub(crate) async fn recv_gather(&self, key: GatherKey) -> Result<Vec<u8>> {
        let rx = {
            let mut mailbox = self.gather.lock().await;
            match mailbox.remove(&key) {
                Some(GatherSlot::Arrived(payload)) => return Ok(payload),
                Some(GatherSlot::Waiting(_)) => {
                    return Err(RpcError::CollectiveFailed {
                        operation: "allgather",
                        rank: self.rank,
                        reason: format!("duplicate wait for epoch {} step {}", key.0, key.1),
                    });
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    mailbox.insert(key, GatherSlot::Waiting(tx));
                    rx
                }
            }
        };
        rx.await
            .map_err(|_| RpcError::PeerDisconnected { rank: self.rank })
    }
}

/// Accept incoming QUIC uni streams and spawn a reader task per stream.
async fn accept_loop(conn: quinn::Connection, tx: RouterSenders) -> Result<()> {
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_STREAMS));

    loop {
        let mut stream = match conn.accept_uni().await {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(rank = tx.rank, "router: connection closed: {e}");
                // Dropping waiting senders wakes pending gathers with an error.
                tx.gather
                    .lock()
                    .await
                    .retain(|_, slot| matches!(slot, GatherSlot::Arrived(_)));
                return Ok(());
            }
        };

        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            return Ok(());
        };

        let tx = tx.clone();
        tokio::spawn(async move {
            match read_framed_stream(&mut stream).await {
                Ok(msg) => {
                    if let Err(e) = dispatch(msg, &tx).await {
                        tracing::error!(
                            rank = tx.rank,
                            "router: local receiver dropped, messages will be lost: {e}"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(rank = tx.rank, "router: skipping unreadable stream: {e}");
                }
            }
            drop(permit);
        });
    }
}

/// Route a decoded message to the correct lane.
///
/// Returns `Err` if the target lane's receiver has been dropped.
async fn dispatch(msg: RpcMessage, tx: &RouterSenders) -> Result<()> {
    match msg {
        RpcMessage::Request { .. } | RpcMessage::Response { .. } => {
            if tx.rpc.send(msg).await.is_err() {
                return Err(RpcError::PeerDisconnected { rank: tx.rank });
            }
        }
        RpcMessage::Barrier { .. } | RpcMessage::BarrierAck { .. } | RpcMessage::Hello { .. } => {
            if tx.control.send(msg).await.is_err() {
                return Err(RpcError::PeerDisconnected { rank: tx.rank });
            }
        }
        RpcMessage::Gather {
            epoch,
            step,
            payload,
        } => {
            let mut mailbox = tx.gather.lock().await;
            match mailbox.remove(&(epoch, step)) {
                Some(GatherSlot::Waiting(waiter)) => {
                    let _ = waiter.send(payload);
                }
                Some(GatherSlot::Arrived(_)) => {
                    tracing::warn!(
                        rank = tx.rank,
                        epoch,
                        step,
                        "router: duplicate gather payload, keeping the newest"
                    );
                    mailbox.insert((epoch, step), GatherSlot::Arrived(payload));
                }
                None => {
                    mailbox.insert((epoch, step), GatherSlot::Arrived(payload));
                }
            }
        }
    }
    Ok(())
}
