// Framed request/response envelope
// Every wire unit: 24-bit LE size (header included), type byte, 32-bit dejavu.

use thiserror::Error;

pub const HEADER_SIZE: usize = 8;
pub const MAX_FRAME_SIZE: usize = 0xFF_FFFF;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The declared size is smaller than the header itself. The peer is
    /// misbehaving and must be disconnected.
    #[error("frame size {0} below header size")]
    SizeBelowHeader(u32),
    #[error("frame size {size} exceeds buffer of {available} bytes")]
    Truncated { size: u32, available: usize },
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("malformed {0} body")]
    MalformedBody(&'static str),
}

/// Type codes of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ExchangePublicPeers = 0,
    BroadcastMessage = 1,
    BroadcastComputors = 2,
    BroadcastTick = 3,
    BroadcastFutureTickData = 8,
    RequestComputors = 11,
    RequestQuorumTick = 14,
    RequestTickData = 16,
    BroadcastTransaction = 24,
    RequestCurrentTickInfo = 27,
    RespondCurrentTickInfo = 28,
    RequestTickTransactions = 29,
    RequestEntity = 31,
    RespondEntity = 32,
    RequestContractIpo = 33,
    RespondContractIpo = 34,
    EndResponse = 35,
    RequestIssuedAssets = 36,
    RespondIssuedAssets = 37,
    RequestOwnedAssets = 38,
    RespondOwnedAssets = 39,
    RequestPossessedAssets = 40,
    RespondPossessedAssets = 41,
    SpecialCommand = 255,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => MessageType::ExchangePublicPeers,
            1 => MessageType::BroadcastMessage,
            2 => MessageType::BroadcastComputors,
            3 => MessageType::BroadcastTick,
            8 => MessageType::BroadcastFutureTickData,
            11 => MessageType::RequestComputors,
            14 => MessageType::RequestQuorumTick,
            16 => MessageType::RequestTickData,
            24 => MessageType::BroadcastTransaction,
            27 => MessageType::RequestCurrentTickInfo,
            28 => MessageType::RespondCurrentTickInfo,
            29 => MessageType::RequestTickTransactions,
            31 => MessageType::RequestEntity,
            32 => MessageType::RespondEntity,
            33 => MessageType::RequestContractIpo,
            34 => MessageType::RespondContractIpo,
            35 => MessageType::EndResponse,
            36 => MessageType::RequestIssuedAssets,
            37 => MessageType::RespondIssuedAssets,
            38 => MessageType::RequestOwnedAssets,
            39 => MessageType::RespondOwnedAssets,
            40 => MessageType::RequestPossessedAssets,
            41 => MessageType::RespondPossessedAssets,
            255 => MessageType::SpecialCommand,
            _ => return None,
        })
    }

    /// Broadcast types are re-gossiped when received with a non-zero dejavu.
    pub fn is_broadcast(&self) -> bool {
        matches!(
            self,
            MessageType::BroadcastMessage
                | MessageType::BroadcastComputors
                | MessageType::BroadcastTick
                | MessageType::BroadcastFutureTickData
                | MessageType::BroadcastTransaction
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub size: u32,
    pub message_type: u8,
    /// Gossip dedup nonce. Zero marks a self-originated unit that must not
    /// be re-broadcast.
    pub dejavu: u32,
}

impl FrameHeader {
    pub fn new(body_len: usize, message_type: MessageType, dejavu: u32) -> Self {
        FrameHeader {
            size: (HEADER_SIZE + body_len) as u32,
            message_type: message_type as u8,
            dejavu,
        }
    }

    pub fn is_dejavu_zero(&self) -> bool {
        self.dejavu == 0
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.size as u8;
        out[1] = (self.size >> 8) as u8;
        out[2] = (self.size >> 16) as u8;
        out[3] = self.message_type;
        out[4..8].copy_from_slice(&self.dejavu.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CodecError::Truncated {
                size: HEADER_SIZE as u32,
                available: bytes.len(),
            });
        }
        let size = bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16;
        if (size as usize) < HEADER_SIZE {
            return Err(CodecError::SizeBelowHeader(size));
        }
        Ok(FrameHeader {
            size,
            message_type: bytes[3],
            dejavu: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        })
    }
}

/// One complete wire unit: header plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(message_type: MessageType, dejavu: u32, body: Vec<u8>) -> Self {
        Frame {
            header: FrameHeader::new(body.len(), message_type, dejavu),
            body,
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.header.message_type)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.body.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.body);
        out
    }

    /// Decode one frame from the front of `bytes`. Returns the frame and the
    /// number of bytes consumed; the caller keeps the remainder buffered.
    pub fn decode(bytes: &[u8]) -> Result<(Frame, usize), CodecError> {
        let header = FrameHeader::decode(bytes)?;
        let size = header.size as usize;
        if bytes.len() < size {
            return Err(CodecError::Truncated {
                size: header.size,
                available: bytes.len(),
            });
        }
        Ok((
            Frame {
                header,
                body: bytes[HEADER_SIZE..size].to_vec(),
            },
            size,
        ))
    }
}

/// Non-zero random dejavu for outbound requests and re-broadcasts.
pub fn random_dejavu() -> u32 {
    loop {
        let value: u32 = rand::random();
        if value != 0 {
            return value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let frame = Frame::new(MessageType::BroadcastTick, 0xDEADBEEF, vec![1, 2, 3, 4]);
        let bytes = frame.encode();
        assert_eq!(bytes.len(), HEADER_SIZE + 4);

        let (decoded, consumed) = Frame::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, frame);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn undersized_frame_is_rejected() {
        // Declared size of 3 is below the header size; peers sending this
        // get disconnected.
        let bytes = [3u8, 0, 0, 3, 0, 0, 0, 0];
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(CodecError::SizeBelowHeader(3))
        ));
    }

    #[test]
    fn partial_frame_reports_truncation() {
        let frame = Frame::new(MessageType::RequestTickData, 7, vec![0u8; 16]);
        let bytes = frame.encode();
        assert!(matches!(
            Frame::decode(&bytes[..10]),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn broadcast_classification() {
        assert!(MessageType::BroadcastTransaction.is_broadcast());
        assert!(!MessageType::RequestComputors.is_broadcast());
    }
}
