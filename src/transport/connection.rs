use crate::error::{RpcError, Result};
use crate::protocol::RpcMessage;
use crate::protocol::codec::{decode_message, encode_message};
use crate::types::{Priority, Rank};

/// Stream type tag: first byte on every QUIC uni stream.
pub(crate) const STREAM_TAG_FRAMED: u8 = 0x01;

/// Maximum framed message size accepted from a peer (1 GiB). Senders never
/// go above it, whatever their configured limit.
pub const MAX_MESSAGE_SIZE: u64 = 1024 * 1024 * 1024;

/// A connection to a single peer, wrapping a QUIC connection.
///
/// Handles the **send side**: every message goes out on its own
/// unidirectional stream as `[tag][u64 LE length][framed message]`.
/// Receiving is done by `PeerRouter`.
pub struct PeerConnection {
    pub rank: Rank,
    pub(crate) conn: quinn::Connection,
    max_message_size: u64,
}

impl PeerConnection {
    pub fn new(rank: Rank, conn: quinn::Connection) -> Self {
        Self {
            rank,
            conn,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Lower the largest frame this side will send. Clamped to
    /// `MAX_MESSAGE_SIZE`.
    pub(crate) fn with_max_message_size(mut self, limit: u64) -> Self {
        self.max_message_size = limit.min(MAX_MESSAGE_SIZE);
        self
    }

    /// Send a message as a framed uni stream.
    ///
    /// Frames over the size limit are refused here rather than dropped by
    /// the receiver.
    pub async fn send_message(&self, msg: &RpcMessage, priority: Priority) -> Result<()> {
        let buf = encode_message(msg, priority)?;
        check_frame_size(buf.len() as u64, self.max_message_size)?;
        let mut stream = self
            .conn
            .open_uni()
            .await
            .map_err(|e| RpcError::transport_with_source("open uni stream", e))?;
        stream
            .write_all(&[STREAM_TAG_FRAMED])
            .await
            .map_err(|e| RpcError::transport_with_source("write stream tag", e))?;
        stream
            .write_all(&(buf.len() as u64).to_le_bytes())
            .await
            .map_err(|e| RpcError::transport_with_source("write length", e))?;
        stream
            .write_all(&buf)
            .await
            .map_err(|e| RpcError::transport_with_source("write payload", e))?;
        stream
            .finish()
            .map_err(|e| RpcError::transport_with_source("finish stream", e))?;
        Ok(())
    }

    /// Get the remote address of this connection.
    pub fn remote_addr(&self) -> std::net::SocketAddr {
        self.conn.remote_address()
    }

    /// Close the connection with an application-level reason.
    pub fn close(&self, reason: &str) {
        self.conn.close(0u32.into(), reason.as_bytes());
    }
}

fn check_frame_size(len: u64, limit: u64) -> Result<()> {
    if len > limit {
        return Err(RpcError::EncodeFailed(format!(
            "message too large ({len} bytes, limit {limit})"
        )));
    }
    Ok(())
}

/// Read one framed message from a uni stream: tag byte, length, payload.
pub(crate) async fn read_framed_stream(stream: &mut quinn::RecvStream) -> Result<RpcMessage> {
    let mut tag = [0u8; 1];
    stream
        .read_exact(&mut tag)
        .await
        .map_err(|e| RpcError::transport_with_source("read stream tag", e))?;
    if tag[0] != STREAM_TAG_FRAMED {
        return Err(RpcError::DecodeFailed(format!(
            "unknown stream tag 0x{:02x}",
            tag[0]
        )));
    }

    let mut len_buf = [0u8; 8];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| RpcError::transport_with_source("read length", e))?;
    let len = u64::from_le_bytes(len_buf);
    if len > MAX_MESSAGE_SIZE {
        return Err(RpcError::DecodeFailed(format!(
            "message too large ({len} bytes)"
        )));
    }

    let mut buf = vec![0u8; len as usize];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| RpcError::transport_with_source("read payload", e))?;

    let (_, msg) = decode_message(&buf)?;
    Ok(msg)
}
