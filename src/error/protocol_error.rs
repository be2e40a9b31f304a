/// Indicates the specific cause of a wire protocol error.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum ProtocolError {
    /// The leading byte of an Engine.IO packet does not name a packet type.
    #[error("Invalid Engine.IO packet type: {0}")]
    InvalidPacketType(u8),
    /// An Engine.IO frame arrived without a type byte.
    #[error("Empty Engine.IO frame")]
    EmptyFrame,
    /// The base64 payload of a `b`-framed packet failed to decode.
    #[error("Invalid base64 payload")]
    InvalidBase64,
    /// The Socket.IO packet header could not be parsed.
    #[error("Invalid Socket.IO packet")]
    InvalidPacket,
    /// The first frame of a Socket.IO packet must be a text frame.
    #[error("Expected a text frame")]
    NeedTextFrame,
    /// A binary attachment arrived on a text frame.
    #[error("Expected a binary frame")]
    NeedBinaryFrame,
    /// A placeholder referenced an attachment index that was never sent.
    #[error("Attachment index {0} out of range")]
    AttachmentOutOfRange(usize),
}
