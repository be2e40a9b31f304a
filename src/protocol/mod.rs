//! Socket.IO packet layer: the multi-frame packet codec and the seams it
//! needs from the connection underneath.

pub mod binary;
pub mod decoder;
pub mod encoder;
pub mod packet;

pub use self::binary::Arg;
pub use self::decoder::Decoder;
pub use self::encoder::Encoder;
pub use self::packet::{Packet, PacketType};

use crate::engine::{Connection, MessageKind, PacketReader};
use crate::error::Result;

/// Source of inbound frames, one Engine.IO MESSAGE packet per call.
pub trait FrameReader {
    /// Block until the next frame arrives.
    fn next_reader(&self) -> Result<PacketReader>;
}

/// Sink for outbound frames.
///
/// All frames passed to one call belong to one Socket.IO packet and must
/// reach the wire contiguously, in order.
pub trait FrameWriter {
    /// Write the frames of one packet.
    fn write_frames(&self, frames: Vec<(MessageKind, Vec<u8>)>) -> Result<()>;
}

impl FrameReader for Connection {
    fn next_reader(&self) -> Result<PacketReader> {
        Connection::next_reader(self)
    }
}

impl FrameWriter for Connection {
    fn write_frames(&self, frames: Vec<(MessageKind, Vec<u8>)>) -> Result<()> {
        Connection::write_frames(self, frames)
    }
}
