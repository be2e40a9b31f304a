//! Error handling.

mod protocol_error;
mod url_error;

pub use protocol_error::ProtocolError;
pub use url_error::UrlError;

use std::{io, result};

/// Result type of all library calls.
pub type Result<T, E = Error> = result::Result<T, E>;

/// Possible Socket.IO client errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The connection is closed, or the operation was attempted on a
    /// connection that is shutting down.
    ///
    /// Reading from a closed connection returns this instead of blocking,
    /// and emitting on a dead [`Socket`](crate::Socket) returns this once
    /// the reconnection attempts are exhausted.
    #[error("Connection closed")]
    ConnectionClosed,
    /// Input-output error on the underlying socket.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Error raised by the WebSocket transport.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// Malformed wire bytes at the Engine.IO or Socket.IO layer.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// JSON encoding or decoding failure, including handler argument
    /// materialization.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Invalid server URL.
    #[error("URL error: {0}")]
    Url(#[from] UrlError),
}
