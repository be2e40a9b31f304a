use bytes::Bytes;
use serde_json::Value;

use crate::error::{ProtocolError, Result};

/// Socket.IO packet type.
///
/// The first seven kinds appear on the wire; `Connecting` and
/// `ReconnectFailed` are synthesized by the client so that reconnection
/// progress flows through the same dispatch table as real packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Namespace handshake from the server.
    Connect,
    /// Namespace teardown.
    Disconnect,
    /// Named event with JSON arguments.
    Event,
    /// Acknowledgement of an event.
    Ack,
    /// Server-side error.
    Error,
    /// Event carrying binary attachments.
    BinaryEvent,
    /// Acknowledgement carrying binary attachments.
    BinaryAck,
    /// Synthetic: a connection attempt is starting.
    Connecting,
    /// Synthetic: the reconnection attempt cap was exceeded.
    ReconnectFailed,
}

impl PacketType {
    /// Decode a type from its wire digit.
    pub fn from_u8(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0 => Ok(PacketType::Connect),
            1 => Ok(PacketType::Disconnect),
            2 => Ok(PacketType::Event),
            3 => Ok(PacketType::Ack),
            4 => Ok(PacketType::Error),
            5 => Ok(PacketType::BinaryEvent),
            6 => Ok(PacketType::BinaryAck),
            _ => Err(ProtocolError::InvalidPacket),
        }
    }

    /// The wire digit of this type, if it has one.
    pub fn wire_byte(self) -> Option<u8> {
        match self {
            PacketType::Connect => Some(0),
            PacketType::Disconnect => Some(1),
            PacketType::Event => Some(2),
            PacketType::Ack => Some(3),
            PacketType::Error => Some(4),
            PacketType::BinaryEvent => Some(5),
            PacketType::BinaryAck => Some(6),
            PacketType::Connecting | PacketType::ReconnectFailed => None,
        }
    }

    /// Whether this packet is followed by binary attachment frames.
    pub fn is_binary(self) -> bool {
        matches!(self, PacketType::BinaryEvent | PacketType::BinaryAck)
    }

    /// The binary form of an EVENT or ACK; other kinds are unchanged.
    pub fn to_binary(self) -> Self {
        match self {
            PacketType::Event => PacketType::BinaryEvent,
            PacketType::Ack => PacketType::BinaryAck,
            other => other,
        }
    }

    /// The plain form of a BINARY_EVENT or BINARY_ACK; other kinds are
    /// unchanged.
    pub fn from_binary(self) -> Self {
        match self {
            PacketType::BinaryEvent => PacketType::Event,
            PacketType::BinaryAck => PacketType::Ack,
            other => other,
        }
    }
}

/// One Socket.IO packet.
#[derive(Debug, Clone)]
pub struct Packet {
    /// The packet kind.
    pub packet_type: PacketType,
    /// Namespace, `""` for the default namespace. Carries its leading `/`.
    pub nsp: String,
    /// Acknowledgement id; negative means "no id".
    pub id: i64,
    /// Structured payload, decoded lazily (see
    /// [`Decoder::decode_data`](crate::protocol::Decoder::decode_data)).
    pub data: Option<Value>,
    /// Number of binary attachments announced in the header.
    pub attachment_count: usize,
    /// The attachments themselves, present once decoded or when emitting.
    pub attachments: Vec<Bytes>,
}

impl Packet {
    /// A bodyless client-side packet of the given type.
    pub fn synthetic(packet_type: PacketType) -> Packet {
        Packet {
            packet_type,
            nsp: String::new(),
            id: -1,
            data: None,
            attachment_count: 0,
            attachments: Vec::new(),
        }
    }
}
