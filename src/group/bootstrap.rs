use crate::config::RpcConfig;
use crate::error::{RpcError, Result};
use crate::group::ProcessGroup;
use crate::protocol::RpcMessage;
use crate::transport::tls::make_client_config;
use crate::transport::{PeerConnection, TransportListener, read_framed_stream};
use crate::types::{PROTOCOL_VERSION, Priority, Rank};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};

impl ProcessGroup {
    /// Form a group with every rank running in this process.
    ///
    /// Each rank gets its own loopback listener and the ranks connect to
    /// each other over real QUIC. Meant for tests and single-host demos.
    pub async fn bootstrap_local(world_size: u32, config: RpcConfig) -> Result<Vec<ProcessGroup>> {
        if world_size == 0 {
            return Err(RpcError::InvalidArgument(
                "world size must be at least 1".into(),
            ));
        }

        let mut listeners = Vec::with_capacity(world_size as usize);
        let mut addrs = Vec::with_capacity(world_size as usize);
        for _ in 0..world_size {
            let listener = TransportListener::bind(
                "127.0.0.1:0".parse().expect("hardcoded socket addr"),
                config.keep_alive_interval,
            )?;
            addrs.push(listener.local_addr());
            listeners.push(listener);
        }

        let mut handles = Vec::with_capacity(world_size as usize);
        for (rank, listener) in listeners.into_iter().enumerate() {
            let addrs = addrs.clone();
            let config = config.clone();
            handles.push(tokio::spawn(async move {
                ProcessGroup::join_mesh(listener, rank as Rank, &addrs, config).await
            }));
        }

        let mut groups = Vec::with_capacity(world_size as usize);
        for handle in handles {
            groups.push(
                handle
                    .await
                    .map_err(|e| RpcError::transport(format!("mesh task panicked: {e}")))??,
            );
        }
        groups.sort_by_key(|g| g.rank());
        Ok(groups)
    }

    /// Join a group from a static roster.
    ///
    /// `peer_addrs[r]` is the listening address of rank `r`; the entry for
    /// `rank` itself is ignored (the caller already owns `listener`). Rank
    /// `i` dials every lower rank and announces itself with a `Hello`; it
    /// accepts one connection from every higher rank.
    pub async fn join_mesh(
        listener: TransportListener,
        rank: Rank,
        peer_addrs: &[SocketAddr],
        config: RpcConfig,
    ) -> Result<ProcessGroup> {
        let world_size = u32::try_from(peer_addrs.len())
            .map_err(|_| RpcError::InvalidArgument("too many peers".into()))?;
        if world_size == 0 {
            return Err(RpcError::InvalidArgument("peer list is empty".into()));
        }
        if rank >= world_size {
            return Err(RpcError::InvalidRank { rank, world_size });
        }

        let connected = AtomicU32::new(0);
        let formation = form_mesh(&listener, rank, peer_addrs, &config, &connected);
        let (peers, endpoint) = match tokio::time::timeout(config.mesh_timeout, formation).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RpcError::MeshFormationTimeout {
                    connected: connected.load(Ordering::Relaxed),
                    expected: world_size - 1,
                });
            }
        };

        tracing::info!(
            rank,
            world_size,
            addr = %listener.local_addr(),
            "mesh formed"
        );
        Ok(ProcessGroup::new(
            rank,
            world_size,
            peers,
            Some(listener),
            endpoint,
            config,
        ))
    }

    /// Join the default group described by the environment.
    ///
    /// - `RANKCALL_RANK`: this process's rank
    /// - `RANKCALL_PEERS`: comma-separated `host:port` list, indexed by rank
    /// - `RANKCALL_WORLD_SIZE` (optional): must match the peer count
    ///
    /// Timeouts and limits come from `RpcConfig::from_env`.
    pub async fn from_env() -> Result<ProcessGroup> {
        let rank: Rank = required_env("RANKCALL_RANK")?
            .parse()
            .map_err(|e| RpcError::InvalidArgument(format!("RANKCALL_RANK: {e}")))?;
        let peers = required_env("RANKCALL_PEERS")?;

        let mut peer_addrs = Vec::new();
        for entry in peers.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let addr = tokio::net::lookup_host(entry)
                .await?
                .next()
                .ok_or_else(|| {
                    RpcError::InvalidArgument(format!("RANKCALL_PEERS: cannot resolve {entry}"))
                })?;
            peer_addrs.push(addr);
        }

        if let Ok(ws) = std::env::var("RANKCALL_WORLD_SIZE") {
            let ws: usize = ws
                .parse()
                .map_err(|e| RpcError::InvalidArgument(format!("RANKCALL_WORLD_SIZE: {e}")))?;
            if ws != peer_addrs.len() {
                return Err(RpcError::InvalidArgument(format!(
                    "RANKCALL_WORLD_SIZE is {ws} but RANKCALL_PEERS lists {} addresses",
                    peer_addrs.len()
                )));
            }
        }

        let local = *peer_addrs.get(rank as usize).ok_or(RpcError::InvalidRank {
            rank,
            world_size: peer_addrs.len() as u32,
        })?;

        let config = RpcConfig::from_env();
        let listener = TransportListener::bind(local, config.keep_alive_interval)?;
        ProcessGroup::join_mesh(listener, rank, &peer_addrs, config).await
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| RpcError::InvalidArgument(format!("{key} is not set")))
}

type MeshParts = (HashMap<Rank, PeerConnection>, Option<quinn::Endpoint>);

async fn form_mesh(
    listener: &TransportListener,
    rank: Rank,
    peer_addrs: &[SocketAddr],
    config: &RpcConfig,
    connected: &AtomicU32,
) -> Result<MeshParts> {
    let world_size = peer_addrs.len() as Rank;

    // Only ranks with someone below them need to dial out.
    let endpoint = if rank > 0 {
        let bind: SocketAddr = if peer_addrs[0].is_ipv6() {
            "[::]:0".parse().expect("hardcoded socket addr")
        } else {
            "0.0.0.0:0".parse().expect("hardcoded socket addr")
        };
        let mut endpoint = quinn::Endpoint::client(bind)
            .map_err(|e| RpcError::transport_with_source("mesh client endpoint", e))?;
        endpoint.set_default_client_config(make_client_config(config.keep_alive_interval)?);
        Some(endpoint)
    } else {
        None
    };

    let dial_all = async {
        let Some(endpoint) = &endpoint else {
            return Ok(Vec::new());
        };
        let dials = (0..rank).map(|peer| dial_peer(endpoint, rank, peer, peer_addrs[peer as usize], connected));
        futures::future::try_join_all(dials).await
    };

    let accept_all = async {
        let mut accepted = Vec::new();
        for _ in (rank + 1)..world_size {
            let peer = accept_peer(listener, rank, world_size).await?;
            connected.fetch_add(1, Ordering::Relaxed);
            accepted.push(peer);
        }
        Ok::<_, RpcError>(accepted)
    };

    let (dialed, accepted) = tokio::try_join!(dial_all, accept_all)?;

    let mut peers = HashMap::new();
    for peer in dialed.into_iter().chain(accepted) {
        let peer_rank = peer.rank;
        if peers.insert(peer_rank, peer).is_some() {
            return Err(RpcError::ConnectionFailed {
                rank: peer_rank,
                reason: "duplicate connection during mesh formation".into(),
            });
        }
    }
    Ok((peers, endpoint))
}

/// Connect to a lower rank and announce ourselves.
async fn dial_peer(
    endpoint: &quinn::Endpoint,
    rank: Rank,
    peer: Rank,
    addr: SocketAddr,
    connected: &AtomicU32,
) -> Result<PeerConnection> {
    let connecting = endpoint
        .connect(addr, "localhost")
        .map_err(|e| RpcError::ConnectionFailed {
            rank: peer,
            reason: e.to_string(),
        })?;
    let conn = connecting.await.map_err(|e| RpcError::ConnectionFailed {
        rank: peer,
        reason: e.to_string(),
    })?;

    let peer_conn = PeerConnection::new(peer, conn);
    peer_conn
        .send_message(
            &RpcMessage::Hello {
                protocol_version: PROTOCOL_VERSION,
                rank,
            },
            Priority::Critical,
        )
        .await?;

    connected.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(rank, peer, %addr, "mesh: dialed peer");
    Ok(peer_conn)
}

/// Accept one connection from a higher rank and read its `Hello`.
async fn accept_peer(
    listener: &TransportListener,
    rank: Rank,
    world_size: u32,
) -> Result<PeerConnection> {
    let conn = listener.accept().await?;
    let mut stream = conn
        .accept_uni()
        .await
        .map_err(|e| RpcError::transport_with_source("accept hello stream", e))?;

    match read_framed_stream(&mut stream).await? {
        RpcMessage::Hello {
            protocol_version,
            rank: peer,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                return Err(RpcError::ProtocolMismatch {
                    local: PROTOCOL_VERSION,
                    remote: protocol_version,
                });
            }
            if peer <= rank || peer >= world_size {
                return Err(RpcError::ConnectionFailed {
                    rank: peer,
                    reason: format!("rank {peer} must not dial rank {rank}"),
                });
            }
            tracing::debug!(rank, peer, addr = %conn.remote_address(), "mesh: accepted peer");
            Ok(PeerConnection::new(peer, conn))
        }
        other => Err(RpcError::ConnectionFailed {
            rank,
            reason: format!("expected Hello, got {:?}", other.message_type()),
        }),
    }
}
