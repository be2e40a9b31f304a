//! Blocking Socket.IO v3 client over WebSocket.
//!
//! The crate speaks the Engine.IO v3 framing and the Socket.IO v3 packet
//! grammar over a single WebSocket transport: heartbeat, namespaces,
//! acknowledgements, binary attachments, and transparent reconnection.
//!
//! ```no_run
//! use socketio_client::{connect, Arg};
//!
//! # fn main() -> socketio_client::Result<()> {
//! let socket = connect("http://localhost:3000")?;
//! socket.on("connection", || println!("connected"));
//! socket.on("chat", |message: String| println!("chat: {}", message));
//! socket.emit("chat", vec![Arg::from("hello")])?;
//! # Ok(())
//! # }
//! ```
#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_must_use,
    unused_mut,
    unused_imports,
    unused_import_braces
)]

pub mod caller;
pub mod client;
pub mod engine;
pub mod error;
pub mod protocol;

mod util;

pub use crate::caller::{Handler, IntoAck, IntoHandler};
pub use crate::client::{
    connect, connect_with_options, Socket, SocketOptions, ON_CONNECTING, ON_CONNECTION,
    ON_DISCONNECTION, ON_ERROR, ON_MESSAGE, ON_RECONNECT_FAILED,
};
pub use crate::error::{Error, Result};
pub use crate::protocol::Arg;
