use crate::error::{RpcError, Result};
use crate::transport::tls::{generate_self_signed_cert, make_server_config};
use std::net::SocketAddr;
use std::time::Duration;

/// Listens for incoming QUIC connections on a bound address.
pub struct TransportListener {
    endpoint: quinn::Endpoint,
    local_addr: SocketAddr,
}

impl TransportListener {
    /// Bind a QUIC listener on the given address with a fresh self-signed certificate.
    pub fn bind(addr: SocketAddr, keep_alive: Duration) -> Result<Self> {
        let (cert, key) = generate_self_signed_cert()?;
        let server_config = make_server_config(cert, key, keep_alive)?;
        Self::bind_with_config(addr, server_config)
    }

    /// Bind with an existing server config.
    pub fn bind_with_config(addr: SocketAddr, config: quinn::ServerConfig) -> Result<Self> {
        let endpoint = quinn::Endpoint::server(config, addr)
            .map_err(|e| RpcError::transport_with_source(format!("bind {addr}"), e))?;

        let local_addr = endpoint
            .local_addr()
            .map_err(|e| RpcError::transport_with_source("local_addr", e))?;

        Ok(Self {
            endpoint,
            local_addr,
        })
    }

    /// Accept the next incoming QUIC connection.
    pub async fn accept(&self) -> Result<quinn::Connection> {
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or_else(|| RpcError::transport("endpoint closed"))?;

        incoming
            .await
            .map_err(|e| RpcError::transport_with_source("accept", e))
    }

    /// The local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The underlying quinn endpoint.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}
