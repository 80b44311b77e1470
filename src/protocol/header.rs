/// Size of the wire header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Category of the message that follows the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Handshake and barrier traffic.
    Control = 0,
    /// RPC requests and responses.
    Rpc = 1,
    /// All-gather contributions.
    Gather = 2,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(MessageType::Control),
            1 => Some(MessageType::Rpc),
            2 => Some(MessageType::Gather),
            _ => None,
        }
    }
}

/// 8-byte wire header prepended to every framed message.
///
/// ```text
/// [0..4] payload_length: u32 LE
/// [4]    priority: u8
/// [5]    message_type: u8
/// [6..8] reserved: u16 (must be 0)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Length of the payload following this header.
    pub payload_length: u32,
    /// Priority lane (maps to `Priority` enum).
    pub priority: u8,
    /// Category of the payload.
    pub message_type: MessageType,
}

impl Header {
    /// Encode header to 8 bytes (little-endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.payload_length.to_le_bytes());
        buf[4] = self.priority;
        buf[5] = self.message_type as u8;
        buf
    }

    /// Decode header from 8 bytes.
    ///
    /// Returns `None` if the message type byte is invalid.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Option<Self> {
        let payload_length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let message_type = MessageType::from_u8(buf[5])?;
        Some(Header {
            payload_length,
            priority: buf[4],
            message_type,
        })
    }
}
