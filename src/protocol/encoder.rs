use crate::engine::MessageKind;
use crate::error::{ProtocolError, Result};
use crate::protocol::packet::Packet;
use crate::protocol::FrameWriter;

/// Serializes Socket.IO packets onto a [`FrameWriter`].
///
/// A packet becomes one text frame carrying `<type>[<count>-][/nsp,][id][json]`
/// followed by one binary frame per attachment; all frames are handed to the
/// writer together so they reach the wire contiguously.
pub struct Encoder<'a, W: FrameWriter> {
    writer: &'a W,
}

impl<'a, W: FrameWriter> Encoder<'a, W> {
    /// An encoder writing to `writer`.
    pub fn new(writer: &'a W) -> Self {
        Encoder { writer }
    }

    /// Encode one packet.
    ///
    /// A packet with attachments is promoted from EVENT / ACK to its binary
    /// form before the header is rendered.
    pub fn encode(&self, mut packet: Packet) -> Result<()> {
        if !packet.attachments.is_empty() {
            packet.packet_type = packet.packet_type.to_binary();
            packet.attachment_count = packet.attachments.len();
        }

        let digit = packet
            .packet_type
            .wire_byte()
            .ok_or(ProtocolError::InvalidPacket)?;
        let mut header = String::new();
        header.push((b'0' + digit) as char);
        if packet.packet_type.is_binary() {
            header.push_str(&packet.attachment_count.to_string());
            header.push('-');
        }
        let mut need_end = false;
        if !packet.nsp.is_empty() {
            header.push_str(&packet.nsp);
            need_end = true;
        }
        if packet.id >= 0 {
            if need_end {
                header.push(',');
                need_end = false;
            }
            header.push_str(&packet.id.to_string());
        }
        if let Some(data) = &packet.data {
            if need_end {
                header.push(',');
            }
            header.push_str(&serde_json::to_string(data)?);
        }

        let mut frames = Vec::with_capacity(1 + packet.attachments.len());
        frames.push((MessageKind::Text, header.into_bytes()));
        for attachment in &packet.attachments {
            frames.push((MessageKind::Binary, attachment.to_vec()));
        }
        self.writer.write_frames(frames)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::protocol::binary::{deconstruct_args, Arg};
    use crate::protocol::packet::PacketType;

    #[derive(Default)]
    struct CollectWriter {
        frames: Mutex<Vec<(MessageKind, Vec<u8>)>>,
    }

    impl FrameWriter for CollectWriter {
        fn write_frames(&self, frames: Vec<(MessageKind, Vec<u8>)>) -> Result<()> {
            self.frames.lock().unwrap().extend(frames);
            Ok(())
        }
    }

    fn event(nsp: &str, id: i64, args: Vec<Arg>) -> Packet {
        let (values, attachments) = deconstruct_args(args);
        Packet {
            packet_type: PacketType::Event,
            nsp: nsp.to_owned(),
            id,
            data: Some(serde_json::Value::Array(values)),
            attachment_count: attachments.len(),
            attachments,
        }
    }

    fn encode(packet: Packet) -> Vec<(MessageKind, Vec<u8>)> {
        let writer = CollectWriter::default();
        Encoder::new(&writer).encode(packet).unwrap();
        writer.frames.into_inner().unwrap()
    }

    #[test]
    fn plain_event() {
        let frames = encode(event("", -1, vec![Arg::from("chat"), Arg::from("hi")]));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, MessageKind::Text);
        assert_eq!(frames[0].1, br#"2["chat","hi"]"#);
    }

    #[test]
    fn event_with_ack_id() {
        let frames = encode(event(
            "",
            0,
            vec![Arg::from("update"), Arg::json(&json!({ "x": 1 })).unwrap()],
        ));
        assert_eq!(frames[0].1, br#"20["update",{"x":1}]"#);
    }

    #[test]
    fn event_with_namespace_and_id() {
        let frames = encode(event("/chat", 12, vec![Arg::from("m")]));
        assert_eq!(frames[0].1, br#"2/chat,12["m"]"#);
    }

    #[test]
    fn namespace_without_id_gets_comma_before_data() {
        let frames = encode(event("/chat", -1, vec![Arg::from("m")]));
        assert_eq!(frames[0].1, br#"2/chat,["m"]"#);
    }

    #[test]
    fn binary_event_is_promoted_and_split() {
        let frames = encode(event(
            "",
            -1,
            vec![Arg::from("bin"), Arg::binary(vec![1u8, 2, 3])],
        ));
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0].1,
            br#"51-["bin",{"_placeholder":true,"num":0}]"#
        );
        assert_eq!(frames[1], (MessageKind::Binary, vec![1, 2, 3]));
    }

    #[test]
    fn ack_reply() {
        let packet = Packet {
            packet_type: PacketType::Ack,
            nsp: String::new(),
            id: 5,
            data: Some(json!([true])),
            attachment_count: 0,
            attachments: Vec::new(),
        };
        assert_eq!(encode(packet)[0].1, br#"35[true]"#);
    }

    #[test]
    fn synthetic_types_never_encode() {
        let packet = Packet::synthetic(PacketType::Connecting);
        let writer = CollectWriter::default();
        assert!(Encoder::new(&writer).encode(packet).is_err());
    }
}
