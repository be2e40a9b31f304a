//! Engine.IO packet framing: one type byte followed by the payload.

use std::io::{self, Write};

use bytes::Bytes;
use data_encoding::BASE64;

use crate::error::{ProtocolError, Result};

/// Engine.IO packet type, wire-encoded as a single digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePacketType {
    /// Sent by the server right after the transport is established.
    Open,
    /// Request to close the transport.
    Close,
    /// Heartbeat probe.
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Carries a Socket.IO packet.
    Message,
    /// Transport upgrade notification.
    Upgrade,
    /// Forces a packet flush; carries nothing.
    Noop,
}

impl EnginePacketType {
    /// Decode a type from its wire byte.
    pub fn from_u8(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0 => Ok(EnginePacketType::Open),
            1 => Ok(EnginePacketType::Close),
            2 => Ok(EnginePacketType::Ping),
            3 => Ok(EnginePacketType::Pong),
            4 => Ok(EnginePacketType::Message),
            5 => Ok(EnginePacketType::Upgrade),
            6 => Ok(EnginePacketType::Noop),
            byte => Err(ProtocolError::InvalidPacketType(byte)),
        }
    }

    /// The wire byte of this type.
    pub fn to_u8(self) -> u8 {
        match self {
            EnginePacketType::Open => 0,
            EnginePacketType::Close => 1,
            EnginePacketType::Ping => 2,
            EnginePacketType::Pong => 3,
            EnginePacketType::Message => 4,
            EnginePacketType::Upgrade => 5,
            EnginePacketType::Noop => 6,
        }
    }
}

/// Whether a frame travels as WebSocket text or binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// UTF-8 text frame.
    Text,
    /// Binary frame.
    Binary,
}

enum Framing {
    /// The type byte has already been written; payload passes through.
    Direct,
    /// Payload is buffered and emitted as standard base64 on `finish`.
    Base64(Vec<u8>),
}

/// Writes a single Engine.IO packet into an underlying writer.
///
/// The constructor emits the framing prefix immediately; the payload is then
/// written through [`Write`]. [`finish`](PacketEncoder::finish) completes the
/// packet.
pub struct PacketEncoder<W: Write> {
    w: W,
    framing: Framing,
}

impl<W: Write> PacketEncoder<W> {
    /// Encoder for the text framing: an ASCII digit followed by the payload.
    pub fn text(mut w: W, packet_type: EnginePacketType) -> Result<Self> {
        w.write_all(&[packet_type.to_u8() + b'0'])?;
        Ok(PacketEncoder { w, framing: Framing::Direct })
    }

    /// Encoder for the binary framing: a raw type byte followed by the payload.
    pub fn binary(mut w: W, packet_type: EnginePacketType) -> Result<Self> {
        w.write_all(&[packet_type.to_u8()])?;
        Ok(PacketEncoder { w, framing: Framing::Direct })
    }

    /// Encoder for a binary payload carried on a text frame: `b`, the ASCII
    /// digit type, then the payload as standard base64.
    pub fn base64(mut w: W, packet_type: EnginePacketType) -> Result<Self> {
        w.write_all(&[b'b', packet_type.to_u8() + b'0'])?;
        Ok(PacketEncoder { w, framing: Framing::Base64(Vec::new()) })
    }

    /// Complete the packet and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        if let Framing::Base64(payload) = &self.framing {
            self.w.write_all(BASE64.encode(payload).as_bytes())?;
        }
        self.w.flush()?;
        Ok(self.w)
    }
}

impl<W: Write> Write for PacketEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.framing {
            Framing::Direct => self.w.write(buf),
            Framing::Base64(payload) => {
                payload.extend_from_slice(buf);
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.framing {
            Framing::Direct => self.w.flush(),
            Framing::Base64(_) => Ok(()),
        }
    }
}

/// A single decoded Engine.IO packet.
#[derive(Debug, Clone)]
pub struct PacketReader {
    packet_type: EnginePacketType,
    kind: MessageKind,
    payload: Bytes,
}

impl PacketReader {
    /// Parse one frame into a packet.
    ///
    /// A text frame starting with `b` carries a base64-wrapped binary
    /// payload and is reported as [`MessageKind::Binary`].
    pub fn parse(kind: MessageKind, data: Bytes) -> Result<Self> {
        let first = *data.first().ok_or(ProtocolError::EmptyFrame)?;
        match kind {
            MessageKind::Text if first == b'b' => {
                let digit = *data.get(1).ok_or(ProtocolError::EmptyFrame)?;
                let packet_type =
                    EnginePacketType::from_u8(digit.wrapping_sub(b'0'))?;
                let payload = BASE64
                    .decode(&data[2..])
                    .map_err(|_| ProtocolError::InvalidBase64)?;
                Ok(PacketReader {
                    packet_type,
                    kind: MessageKind::Binary,
                    payload: payload.into(),
                })
            }
            MessageKind::Text => Ok(PacketReader {
                packet_type: EnginePacketType::from_u8(first.wrapping_sub(b'0'))?,
                kind: MessageKind::Text,
                payload: data.slice(1..),
            }),
            MessageKind::Binary => Ok(PacketReader {
                packet_type: EnginePacketType::from_u8(first)?,
                kind: MessageKind::Binary,
                payload: data.slice(1..),
            }),
        }
    }

    /// The Engine.IO type of this packet.
    pub fn packet_type(&self) -> EnginePacketType {
        self.packet_type
    }

    /// Whether the payload arrived as text or binary.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The payload bytes, without the framing prefix.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the packet, returning the payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_text(t: EnginePacketType, data: &[u8]) -> Vec<u8> {
        let mut enc = PacketEncoder::text(Vec::new(), t).unwrap();
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn encode_binary(t: EnginePacketType, data: &[u8]) -> Vec<u8> {
        let mut enc = PacketEncoder::binary(Vec::new(), t).unwrap();
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn encode_base64(t: EnginePacketType, data: &[u8]) -> Vec<u8> {
        let mut enc = PacketEncoder::base64(Vec::new(), t).unwrap();
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn type_round_trip() {
        for byte in 0..=6 {
            let t = EnginePacketType::from_u8(byte).unwrap();
            assert_eq!(t.to_u8(), byte);
        }
        assert_eq!(
            EnginePacketType::from_u8(7),
            Err(ProtocolError::InvalidPacketType(7))
        );
    }

    #[test]
    fn text_framing() {
        let cases: &[(EnginePacketType, &[u8], &[u8])] = &[
            (EnginePacketType::Open, b"", b"0"),
            (EnginePacketType::Close, b"", b"1"),
            (EnginePacketType::Ping, b"", b"2"),
            (EnginePacketType::Pong, b"", b"3"),
            (EnginePacketType::Message, b"test", b"4test"),
        ];
        for &(t, data, wire) in cases {
            assert_eq!(encode_text(t, data), wire);
            let packet =
                PacketReader::parse(MessageKind::Text, Bytes::copy_from_slice(wire)).unwrap();
            assert_eq!(packet.packet_type(), t);
            assert_eq!(packet.kind(), MessageKind::Text);
            assert_eq!(packet.payload(), data);
        }
    }

    #[test]
    fn binary_framing() {
        let cases: &[(EnginePacketType, &[u8], &[u8])] = &[
            (EnginePacketType::Open, b"", b"\x00"),
            (EnginePacketType::Close, b"", b"\x01"),
            (EnginePacketType::Message, b"test", b"\x04test"),
        ];
        for &(t, data, wire) in cases {
            assert_eq!(encode_binary(t, data), wire);
            let packet =
                PacketReader::parse(MessageKind::Binary, Bytes::copy_from_slice(wire)).unwrap();
            assert_eq!(packet.packet_type(), t);
            assert_eq!(packet.kind(), MessageKind::Binary);
            assert_eq!(packet.payload(), data);
        }
    }

    #[test]
    fn base64_framing() {
        let cases: &[(EnginePacketType, &[u8], &[u8])] = &[
            (EnginePacketType::Open, b"", b"b0"),
            (EnginePacketType::Message, b"test", b"b4dGVzdA=="),
        ];
        for &(t, data, wire) in cases {
            assert_eq!(encode_base64(t, data), wire);
            let packet =
                PacketReader::parse(MessageKind::Text, Bytes::copy_from_slice(wire)).unwrap();
            assert_eq!(packet.packet_type(), t);
            assert_eq!(packet.kind(), MessageKind::Binary);
            assert_eq!(packet.payload(), data);
        }
    }

    #[test]
    fn parse_rejects_bad_frames() {
        assert!(PacketReader::parse(MessageKind::Text, Bytes::new()).is_err());
        assert!(
            PacketReader::parse(MessageKind::Text, Bytes::from_static(b"7")).is_err()
        );
        assert!(
            PacketReader::parse(MessageKind::Binary, Bytes::from_static(b"\x07")).is_err()
        );
        assert!(
            PacketReader::parse(MessageKind::Text, Bytes::from_static(b"b4!!!")).is_err()
        );
    }
}
