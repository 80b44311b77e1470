use crate::error::{RpcError, Result};
use crate::protocol::header::{HEADER_SIZE, Header};
use crate::protocol::message::RpcMessage;
use crate::types::Priority;

/// Encode an `RpcMessage` into a framed byte buffer: `[header][rkyv payload]`.
pub fn encode_message(msg: &RpcMessage, priority: Priority) -> Result<Vec<u8>> {
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(msg)
        .map_err(|e| RpcError::EncodeFailed(e.to_string()))?;

    if payload.len() > u32::MAX as usize {
        return Err(RpcError::EncodeFailed(format!(
            "payload too large for framed header: {} bytes exceeds u32::MAX",
            payload.len()
        )));
    }

    let header = Header {
        payload_length: payload.len() as u32,
        priority: priority as u8,
        message_type: msg.message_type(),
    };

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a framed byte buffer back into a `(Header, RpcMessage)`.
///
/// The header's message type must agree with the decoded variant.
pub fn decode_message(buf: &[u8]) -> Result<(Header, RpcMessage)> {
    if buf.len() < HEADER_SIZE {
        return Err(RpcError::DecodeFailed(format!(
            "buffer too short: {} < {HEADER_SIZE}",
            buf.len()
        )));
    }

    let header_bytes: &[u8; HEADER_SIZE] = buf[..HEADER_SIZE]
        .try_into()
        .map_err(|_| RpcError::DecodeFailed("header slice length mismatch".into()))?;

    let header = Header::decode(header_bytes)
        .ok_or_else(|| RpcError::DecodeFailed("invalid header: unknown message type".into()))?;

    let payload_end = HEADER_SIZE + header.payload_length as usize;
    if buf.len() < payload_end {
        return Err(RpcError::DecodeFailed(format!(
            "buffer too short for payload: {} < {payload_end}",
            buf.len()
        )));
    }

    // rkyv reads archived fields in place, so the payload needs its own
    // aligned copy.
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(header.payload_length as usize);
    aligned.extend_from_slice(&buf[HEADER_SIZE..payload_end]);

    let msg = rkyv::from_bytes::<RpcMessage, rkyv::rancor::Error>(&aligned)
        .map_err(|e| RpcError::DecodeFailed(e.to_string()))?;

    if msg.message_type() != header.message_type {
        return Err(RpcError::DecodeFailed(format!(
            "header type {:?} does not match message {:?}",
            header.message_type,
            msg.message_type()
        )));
    }

    Ok((header, msg))
}
