use crate::collective::{BarrierProgress, barrier, ring_allgather};
use crate::config::RpcConfig;
use crate::error::{RpcError, Result};
use crate::protocol::RpcMessage;
use crate::transport::router::GatherKey;
use crate::transport::{PeerConnection, PeerRouter, TransportListener};
use crate::types::{Priority, Rank};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A fixed group of ranks connected by a full QUIC mesh.
///
/// This is the collective transport the RPC layer runs on: it knows its own
/// rank and the world size, sends framed messages to any peer, and offers
/// `all_gather` and `barrier` over the whole group. Membership never
/// changes after formation.
///
/// # Example
///
/// ```no_run
/// use rankcall::{ProcessGroup, RpcConfig};
///
/// # async fn example() -> rankcall::Result<()> {
/// let groups = ProcessGroup::bootstrap_local(4, RpcConfig::default()).await?;
///
/// // Each group handle has a unique rank in [0, world_size).
/// assert_eq!(groups[0].rank(), 0);
/// assert_eq!(groups[0].world_size(), 4);
/// # Ok(())
/// # }
/// ```
pub struct ProcessGroup {
    rank: Rank,
    world_size: u32,
    /// Sending side: one `PeerConnection` per remote rank.
    peers: HashMap<Rank, Arc<PeerConnection>>,
    /// Receiving side: one `PeerRouter` per remote rank.
    routers: HashMap<Rank, PeerRouter>,
    /// Background receive loops; kept alive for the lifetime of the group.
    router_handles: Vec<tokio::task::JoinHandle<Result<()>>>,
    /// Endpoints owning the local sockets.
    _listener: Option<TransportListener>,
    _client_endpoint: Option<quinn::Endpoint>,
    config: RpcConfig,
    barrier_progress: tokio::sync::Mutex<BarrierProgress>,
    gather_epoch: AtomicU64,
    /// Set while an RPC agent is attached. At most one agent per group.
    agent_attached: AtomicBool,
}

impl ProcessGroup {
    /// Create a group from pre-established peer connections.
    pub(crate) fn new(
        rank: Rank,
        world_size: u32,
        peers: HashMap<Rank, PeerConnection>,
        listener: Option<TransportListener>,
        client_endpoint: Option<quinn::Endpoint>,
        config: RpcConfig,
    ) -> Self {
        let mut peer_arcs = HashMap::new();
        let mut routers = HashMap::new();
        let mut handles = Vec::new();

        for (peer_rank, peer_conn) in peers {
            let (router, handle) = PeerRouter::spawn(peer_rank, peer_conn.conn.clone());
            let peer_conn = peer_conn.with_max_message_size(config.max_message_size);
            peer_arcs.insert(peer_rank, Arc::new(peer_conn));
            routers.insert(peer_rank, router);
            handles.push(handle);
        }

        Self {
            rank,
            world_size,
            peers: peer_arcs,
            routers,
            router_handles: handles,
            _listener: listener,
            _client_endpoint: client_endpoint,
            config,
            barrier_progress: tokio::sync::Mutex::new(BarrierProgress::default()),
            gather_epoch: AtomicU64::new(0),
            agent_attached: AtomicBool::new(false),
        }
    }

    /// This process's rank in the group (0-indexed).
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Total number of ranks in the group.
    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Ranks of every other member, in ascending order.
    pub fn peer_ranks(&self) -> Vec<Rank> {
        let mut ranks: Vec<Rank> = self.peers.keys().copied().collect();
        ranks.sort_unstable();
        ranks
    }

    /// Get a reference to a peer connection (for sending).
    pub fn peer(&self, rank: Rank) -> Result<&Arc<PeerConnection>> {
        self.peers.get(&rank).ok_or(RpcError::UnknownPeer { rank })
    }

    fn router(&self, rank: Rank) -> Result<&PeerRouter> {
        self.routers.get(&rank).ok_or(RpcError::UnknownPeer { rank })
    }

    /// Send a framed message to `dest`.
    pub async fn send_message(&self, dest: Rank, msg: &RpcMessage, priority: Priority) -> Result<()> {
        if dest >= self.world_size {
            return Err(RpcError::InvalidRank {
                rank: dest,
                world_size: self.world_size,
            });
        }
        self.peer(dest)?.send_message(msg, priority).await
    }

    /// Receive the next request or response frame from `src`.
    pub(crate) async fn recv_rpc(&self, src: Rank) -> Result<RpcMessage> {
        self.router(src)?.recv_rpc().await
    }

    /// Receive the next control message from `src`.
    pub(crate) async fn recv_control(&self, src: Rank) -> Result<RpcMessage> {
        self.router(src)?.recv_control().await
    }

    /// Wait for the gather payload `key` from `src`.
    pub(crate) async fn recv_gather(&self, src: Rank, key: GatherKey) -> Result<Vec<u8>> {
        self.router(src)?.recv_gather(key).await
    }

    /// Barrier state; the lock also keeps barriers on this group one at a
    /// time.
    pub(crate) fn barrier_progress(&self) -> &tokio::sync::Mutex<BarrierProgress> {
        &self.barrier_progress
    }

    pub(crate) fn next_gather_epoch(&self) -> u64 {
        self.gather_epoch.fetch_add(1, Ordering::Relaxed)
    }

    /// All-gather: every rank contributes `data`; the result holds every
    /// contribution at the index of its rank, identically on all ranks.
    ///
    /// Collective: every rank must call it, in the same order relative to
    /// other collectives on this group.
    pub async fn all_gather(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        ring_allgather(self, data).await
    }

    /// Block until every rank has reached the same barrier.
    ///
    /// Waits without limit unless `barrier_timeout` is set. After a
    /// `BarrierTimeout` the barrier can simply be called again.
    pub async fn barrier(&self) -> Result<()> {
        barrier(self, self.config.barrier_timeout).await
    }

    /// Mark the group as owned by an RPC agent.
    pub(crate) fn attach_agent(&self) -> Result<()> {
        self.agent_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| RpcError::AlreadyInitialized)
    }

    pub(crate) fn detach_agent(&self) {
        self.agent_attached.store(false, Ordering::Release);
    }

    /// Whether an RPC agent is currently attached.
    pub fn has_agent(&self) -> bool {
        self.agent_attached.load(Ordering::Acquire)
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        for peer in self.peers.values() {
            peer.close("process group dropped");
        }
        for handle in &self.router_handles {
            handle.abort();
        }
    }
}
