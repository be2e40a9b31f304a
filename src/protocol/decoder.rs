use bytes::Bytes;
use serde_json::Value;

use crate::engine::MessageKind;
use crate::error::{ProtocolError, Result};
use crate::protocol::binary;
use crate::protocol::packet::{Packet, PacketType};
use crate::protocol::FrameReader;

/// Parses Socket.IO packets out of a [`FrameReader`], in two phases.
///
/// [`decode`](Decoder::decode) consumes the header of the next text frame
/// and retains the unparsed JSON body; [`decode_data`](Decoder::decode_data)
/// decodes the body, pulls in any binary attachment frames, and splices them
/// into the payload.
pub struct Decoder<'a, R: FrameReader> {
    reader: &'a R,
    body: Option<Bytes>,
}

impl<'a, R: FrameReader> Decoder<'a, R> {
    /// A decoder reading from `reader`.
    pub fn new(reader: &'a R) -> Self {
        Decoder { reader, body: None }
    }

    /// Read the next frame and parse the packet header.
    ///
    /// The frame must be text. The JSON body, if any, is retained for
    /// [`decode_data`](Decoder::decode_data).
    pub fn decode(&mut self) -> Result<Packet> {
        let frame = self.reader.next_reader()?;
        if frame.kind() != MessageKind::Text {
            return Err(ProtocolError::NeedTextFrame.into());
        }
        let data = frame.into_payload();
        let mut packet = Packet::synthetic(PacketType::Connect);
        let mut pos = 0;

        let first = *data.first().ok_or(ProtocolError::InvalidPacket)?;
        packet.packet_type = PacketType::from_u8(first.wrapping_sub(b'0'))?;
        pos += 1;

        if packet.packet_type.is_binary() {
            let start = pos;
            while pos < data.len() && data[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos == start || data.get(pos) != Some(&b'-') {
                return Err(ProtocolError::InvalidPacket.into());
            }
            // Digits only, verified above.
            packet.attachment_count = std::str::from_utf8(&data[start..pos])
                .ok()
                .and_then(|digits| digits.parse().ok())
                .ok_or(ProtocolError::InvalidPacket)?;
            pos += 1;
        }

        if data.get(pos) == Some(&b'/') {
            let start = pos;
            while pos < data.len() && data[pos] != b',' {
                pos += 1;
            }
            packet.nsp = std::str::from_utf8(&data[start..pos])
                .map_err(|_| ProtocolError::InvalidPacket)?
                .to_owned();
            if pos == data.len() {
                return Ok(packet);
            }
            pos += 1;
        }

        let start = pos;
        while pos < data.len() && data[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos > start {
            packet.id = std::str::from_utf8(&data[start..pos])
                .ok()
                .and_then(|digits| digits.parse().ok())
                .ok_or(ProtocolError::InvalidPacket)?;
        }

        if pos < data.len() {
            self.body = Some(data.slice(pos..));
        }
        Ok(packet)
    }

    /// Decode the retained JSON body into the packet and splice attachments.
    ///
    /// For BINARY_EVENT / BINARY_ACK this reads exactly `attachment_count`
    /// further frames — each must be binary — and demotes the packet to the
    /// matching plain kind, so downstream dispatch only ever sees EVENT and
    /// ACK.
    pub fn decode_data(&mut self, packet: &mut Packet) -> Result<()> {
        let body = match self.body.take() {
            Some(body) => body,
            None => return Ok(()),
        };
        let mut value: Value = serde_json::from_slice(&body)?;
        if packet.packet_type.is_binary() {
            let mut attachments = Vec::with_capacity(packet.attachment_count);
            for _ in 0..packet.attachment_count {
                let frame = self.reader.next_reader()?;
                if frame.kind() != MessageKind::Binary {
                    return Err(ProtocolError::NeedBinaryFrame.into());
                }
                attachments.push(frame.into_payload());
            }
            binary::reconstruct(&mut value, &attachments)?;
            packet.packet_type = packet.packet_type.from_binary();
            packet.attachments = attachments;
        }
        packet.data = Some(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::engine::PacketReader;
    use crate::error::Error;

    /// Replays a scripted sequence of frames.
    struct Frames {
        frames: Mutex<VecDeque<(MessageKind, Bytes)>>,
    }

    impl Frames {
        fn new(frames: Vec<(MessageKind, &'static [u8])>) -> Self {
            Frames {
                frames: Mutex::new(
                    frames
                        .into_iter()
                        .map(|(kind, data)| (kind, Bytes::from_static(data)))
                        .collect(),
                ),
            }
        }

        fn text(frame: &'static [u8]) -> Self {
            Frames::new(vec![(MessageKind::Text, frame)])
        }
    }

    impl FrameReader for Frames {
        fn next_reader(&self) -> Result<PacketReader> {
            let (kind, data) = self
                .frames
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(Error::ConnectionClosed)?;
            // Engine framing: the scripted payloads already carry no prefix.
            Ok(PacketReader::parse(kind, prefixed(kind, data))?)
        }
    }

    fn prefixed(kind: MessageKind, data: Bytes) -> Bytes {
        let mut framed = Vec::with_capacity(data.len() + 1);
        framed.push(match kind {
            MessageKind::Text => b'4',
            MessageKind::Binary => 4,
        });
        framed.extend_from_slice(&data);
        framed.into()
    }

    fn decode_full(frames: Frames) -> Result<Packet> {
        let mut decoder = Decoder::new(&frames);
        let mut packet = decoder.decode()?;
        decoder.decode_data(&mut packet)?;
        Ok(packet)
    }

    #[test]
    fn plain_event() {
        let packet = decode_full(Frames::text(br#"2["chat","hi"]"#)).unwrap();
        assert_eq!(packet.packet_type, PacketType::Event);
        assert_eq!(packet.nsp, "");
        assert_eq!(packet.id, -1);
        assert_eq!(packet.data, Some(json!(["chat", "hi"])));
    }

    #[test]
    fn event_with_id() {
        let packet = decode_full(Frames::text(br#"20["update",{"x":1}]"#)).unwrap();
        assert_eq!(packet.packet_type, PacketType::Event);
        assert_eq!(packet.id, 0);
        assert_eq!(packet.data, Some(json!(["update", { "x": 1 }])));
    }

    #[test]
    fn event_with_namespace_and_id() {
        let packet = decode_full(Frames::text(br#"2/nsp,5["e"]"#)).unwrap();
        assert_eq!(packet.nsp, "/nsp");
        assert_eq!(packet.id, 5);
        assert_eq!(packet.data, Some(json!(["e"])));
    }

    #[test]
    fn connect_with_trailing_namespace() {
        let packet = decode_full(Frames::text(b"0/admin")).unwrap();
        assert_eq!(packet.packet_type, PacketType::Connect);
        assert_eq!(packet.nsp, "/admin");
        assert_eq!(packet.data, None);
    }

    #[test]
    fn bodyless_packets() {
        let packet = decode_full(Frames::text(b"1")).unwrap();
        assert_eq!(packet.packet_type, PacketType::Disconnect);
        assert_eq!(packet.data, None);

        let packet = decode_full(Frames::text(b"0")).unwrap();
        assert_eq!(packet.packet_type, PacketType::Connect);
        assert_eq!(packet.id, -1);
    }

    #[test]
    fn binary_event_is_spliced_and_demoted() {
        let frames = Frames::new(vec![
            (
                MessageKind::Text,
                br#"51-["bin",{"_placeholder":true,"num":0}]"#,
            ),
            (MessageKind::Binary, &[0xde, 0xad]),
        ]);
        let packet = decode_full(frames).unwrap();
        assert_eq!(packet.packet_type, PacketType::Event);
        assert_eq!(packet.attachment_count, 1);
        let data = packet.data.unwrap();
        assert_eq!(data[0], json!("bin"));
        let bytes: Vec<u8> = serde_json::from_value(data[1].clone()).unwrap();
        assert_eq!(bytes, vec![0xde, 0xad]);
    }

    #[test]
    fn binary_ack_is_demoted_to_ack() {
        let frames = Frames::new(vec![
            (
                MessageKind::Text,
                br#"61-3[{"_placeholder":true,"num":0}]"#,
            ),
            (MessageKind::Binary, &[1]),
        ]);
        let packet = decode_full(frames).unwrap();
        assert_eq!(packet.packet_type, PacketType::Ack);
        assert_eq!(packet.id, 3);
    }

    #[test]
    fn first_frame_must_be_text() {
        let frames = Frames::new(vec![(MessageKind::Binary, &[0x42])]);
        let mut decoder = Decoder::new(&frames);
        assert!(matches!(
            decoder.decode(),
            Err(Error::Protocol(ProtocolError::NeedTextFrame))
        ));
    }

    #[test]
    fn attachment_must_be_binary() {
        let frames = Frames::new(vec![
            (
                MessageKind::Text,
                br#"51-["bin",{"_placeholder":true,"num":0}]"#,
            ),
            (MessageKind::Text, b"2[\"oops\"]"),
        ]);
        let mut decoder = Decoder::new(&frames);
        let mut packet = decoder.decode().unwrap();
        assert!(matches!(
            decoder.decode_data(&mut packet),
            Err(Error::Protocol(ProtocolError::NeedBinaryFrame))
        ));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        for wire in [&b"9[]"[..], b"5-[]", b"5x-[]", b"51["] {
            let frames = Frames {
                frames: Mutex::new(
                    [(MessageKind::Text, Bytes::copy_from_slice(wire))].into(),
                ),
            };
            let mut decoder = Decoder::new(&frames);
            assert!(decoder.decode().is_err(), "accepted {:?}", wire);
        }
    }
}
