//! The user-facing Socket: connect, register handlers, emit events, and let
//! the reconnection loop do its work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use log::*;
use serde_json::Value;
use url::Url;

use crate::caller::{Handler, IntoHandler};
use crate::engine::Connection;
use crate::error::{Error, ProtocolError, Result, UrlError};
use crate::protocol::{Arg, Decoder, Encoder, Packet, PacketType};
use crate::protocol::binary::deconstruct_args;
use crate::util::LockResultExt;

/// Fired when the server accepts the namespace handshake.
pub const ON_CONNECTION: &str = "connection";
/// Fired before each connection attempt.
pub const ON_CONNECTING: &str = "connecting";
/// Fired when a connection is torn down, before reconnection starts.
pub const ON_DISCONNECTION: &str = "disconnection";
/// The conventional name used by `send`-style emitters.
pub const ON_MESSAGE: &str = "message";
/// Fired when the server reports an error packet.
pub const ON_ERROR: &str = "error";
/// Fired once when the reconnection attempt cap is exceeded.
pub const ON_RECONNECT_FAILED: &str = "reconnect_failed";

/// Reconnection behavior of a [`Socket`].
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    /// Attempt cap before `reconnect_failed` fires; `0` retries forever.
    pub reconnection_attempts: u32,
    /// Seconds to sleep after a failed attempt; `0` is coerced to 5.
    pub reconnection_delay: u64,
    /// Reconnect immediately and outside the attempt cap after a server
    /// ERROR packet, the way the original protocol client did. Left unset,
    /// an ERROR is paced like any other reconnection.
    pub immediate_error_reconnect: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        SocketOptions {
            reconnection_attempts: 0,
            reconnection_delay: 5,
            immediate_error_reconnect: false,
        }
    }
}

/// Why the read loop stopped.
enum ExitReason {
    /// The server closed the namespace or the transport died.
    Disconnect,
    /// The server sent an ERROR packet.
    ServerError,
}

struct Shared {
    uri: Url,
    options: SocketOptions,
    conn: RwLock<Option<Arc<Connection>>>,
    events: RwLock<HashMap<String, Arc<dyn Handler>>>,
    acks: Mutex<HashMap<i64, Arc<dyn Handler>>>,
    ack_id: Mutex<i64>,
    namespace: RwLock<String>,
    session_id: RwLock<String>,
    attempts: AtomicU32,
    user_closed: AtomicBool,
}

/// A Socket.IO client.
///
/// Cheap to clone; all clones share the same connection, handlers, and
/// acknowledgement table.
#[derive(Clone)]
pub struct Socket {
    shared: Arc<Shared>,
}

/// Connect to a Socket.IO server with default [`SocketOptions`].
///
/// Returns immediately; the connection is established by a background
/// reconnection loop. Register a handler for [`ON_CONNECTION`] to learn when
/// the namespace handshake completes.
pub fn connect(uri: &str) -> Result<Socket> {
    connect_with_options(uri, SocketOptions::default())
}

/// Connect to a Socket.IO server.
pub fn connect_with_options(uri: &str, options: SocketOptions) -> Result<Socket> {
    let uri = Url::parse(uri).map_err(UrlError::from)?;
    let shared = Arc::new(Shared {
        uri,
        options,
        conn: RwLock::new(None),
        events: RwLock::new(HashMap::new()),
        acks: Mutex::new(HashMap::new()),
        ack_id: Mutex::new(0),
        namespace: RwLock::new(String::new()),
        session_id: RwLock::new(String::new()),
        attempts: AtomicU32::new(0),
        user_closed: AtomicBool::new(false),
    });
    spawn_reconnect_loop(shared.clone())?;
    Ok(Socket { shared })
}

impl Socket {
    /// Register `handler` for `event`, replacing any prior registration.
    pub fn on<Args>(&self, event: &str, handler: impl IntoHandler<Args>) {
        let handler: Arc<dyn Handler> = Arc::from(handler.into_handler());
        self.shared
            .events
            .write()
            .ignore_poison()
            .insert(event.to_owned(), handler);
    }

    /// Emit `event` with the given arguments, requesting no acknowledgement.
    pub fn emit(&self, event: &str, args: Vec<Arg>) -> Result<()> {
        self.send_event(event, args, None)
    }

    /// Emit `event` and invoke `handler` with the server's acknowledgement.
    pub fn emit_with_ack<Args>(
        &self,
        event: &str,
        args: Vec<Arg>,
        handler: impl IntoHandler<Args>,
    ) -> Result<()> {
        self.send_event(event, args, Some(handler.into_handler()))
    }

    /// The last session id adopted from the server.
    pub fn get_session_id(&self) -> String {
        self.shared.session_id.read().ignore_poison().clone()
    }

    /// Close the socket and stop reconnecting.
    pub fn close(&self) -> Result<()> {
        self.shared.user_closed.store(true, Ordering::Release);
        if let Some(conn) = self.shared.connection() {
            conn.set_ask_for_closed();
            conn.close();
        }
        Ok(())
    }

    fn send_event(
        &self,
        event: &str,
        args: Vec<Arg>,
        handler: Option<Box<dyn Handler>>,
    ) -> Result<()> {
        let conn = self.shared.connection().ok_or(Error::ConnectionClosed)?;
        let (mut values, attachments) = deconstruct_args(args);
        values.insert(0, Value::String(event.to_owned()));

        let id = match handler {
            Some(handler) => {
                let mut acks = self.shared.acks.lock().ignore_poison();
                let id = self.shared.allocate_ack_id(&acks);
                acks.insert(id, Arc::from(handler));
                id
            }
            None => -1,
        };

        let packet = Packet {
            packet_type: PacketType::Event,
            nsp: self.shared.namespace.read().ignore_poison().clone(),
            id,
            data: Some(Value::Array(values)),
            attachment_count: attachments.len(),
            attachments,
        };
        let result = Encoder::new(&*conn).encode(packet);
        if result.is_err() && id >= 0 {
            self.shared.acks.lock().ignore_poison().remove(&id);
        }
        result
    }
}

impl Shared {
    fn connection(&self) -> Option<Arc<Connection>> {
        self.conn.read().ignore_poison().clone()
    }

    fn user_closed(&self) -> bool {
        self.user_closed.load(Ordering::Acquire)
    }

    /// Next acknowledgement id: monotonically increasing, wrapping to zero
    /// instead of going negative, and skipping ids that still have an
    /// outstanding handler.
    fn allocate_ack_id(&self, acks: &HashMap<i64, Arc<dyn Handler>>) -> i64 {
        let mut counter = self.ack_id.lock().ignore_poison();
        loop {
            let id = *counter;
            *counter = counter.wrapping_add(1);
            if *counter < 0 {
                *counter = 0;
            }
            if !acks.contains_key(&id) {
                return id;
            }
        }
    }

    fn event_handler(&self, event: &str) -> Option<Arc<dyn Handler>> {
        self.events.read().ignore_poison().get(event).cloned()
    }

    /// Fire the handler registered for `event`, padding or truncating the
    /// argument list to the handler's arity.
    fn fire(&self, event: &str, mut args: Vec<Value>) -> Result<Vec<Value>> {
        let handler = match self.event_handler(event) {
            Some(handler) => handler,
            None => return Ok(Vec::new()),
        };
        args.resize(handler.arity(), Value::Null);
        handler.call(args)
    }
}

fn spawn_reconnect_loop(shared: Arc<Shared>) -> Result<()> {
    thread::Builder::new()
        .name("socketio-reconnect".into())
        .spawn(move || reconnect_loop(shared))?;
    Ok(())
}

/// Try to establish a connection until one opens, the user closes the
/// socket, or the attempt cap is exceeded.
fn reconnect_loop(shared: Arc<Shared>) {
    loop {
        if shared.user_closed() {
            shared.attempts.store(0, Ordering::Relaxed);
            return;
        }
        let cap = shared.options.reconnection_attempts;
        if cap > 0 {
            let attempts = shared.attempts.load(Ordering::Relaxed);
            if attempts > cap {
                info!("Giving up after {} reconnection attempts", cap);
                let mut packet = Packet::synthetic(PacketType::ReconnectFailed);
                dispatch_synthetic(&shared, &mut packet);
                return;
            }
            shared.attempts.store(attempts + 1, Ordering::Relaxed);
        }

        let mut packet = Packet::synthetic(PacketType::Connecting);
        dispatch_synthetic(&shared, &mut packet);

        match Connection::open(&shared.uri) {
            Ok(conn) => {
                *shared.conn.write().ignore_poison() = Some(conn.clone());
                shared.attempts.store(0, Ordering::Relaxed);
                let reader = shared.clone();
                let spawned = thread::Builder::new()
                    .name("socketio-read".into())
                    .spawn(move || read_loop(reader, conn));
                if let Err(err) = spawned {
                    warn!("Failed to spawn read loop: {}", err);
                }
                return;
            }
            Err(err) => {
                let mut delay = shared.options.reconnection_delay;
                if delay == 0 {
                    delay = 5;
                }
                warn!("Connection attempt failed: {}; retrying in {}s", err, delay);
                thread::sleep(Duration::from_secs(delay));
            }
        }
    }
}

/// Decode and dispatch packets until the connection dies, then tear down
/// and hand control back to the reconnection loop.
fn read_loop(shared: Arc<Shared>, conn: Arc<Connection>) {
    let reason = match run_read_loop(&shared, &conn) {
        Ok(reason) => reason,
        Err(err) => {
            debug!("Read loop error: {}", err);
            ExitReason::Disconnect
        }
    };
    conn.close();
    conn.drain();

    let mut packet = Packet::synthetic(PacketType::Disconnect);
    dispatch_synthetic(&shared, &mut packet);

    // The connection's own flag tells a user-initiated close apart from a
    // transport failure; only the latter reconnects. The socket-level flag
    // still covers a close that raced this teardown.
    if conn.ask_for_closed() || shared.user_closed() {
        return;
    }
    if matches!(reason, ExitReason::ServerError) && shared.options.immediate_error_reconnect {
        shared.attempts.store(0, Ordering::Relaxed);
    }
    spawn_reconnect_loop(shared.clone()).ok();
}

fn run_read_loop(shared: &Arc<Shared>, conn: &Arc<Connection>) -> Result<ExitReason> {
    loop {
        let mut decoder = Decoder::new(&**conn);
        let mut packet = decoder.decode()?;
        let reply = dispatch(shared, Some(conn), &mut decoder, &mut packet)?;

        match packet.packet_type {
            PacketType::Connect => {
                *shared.namespace.write().ignore_poison() = packet.nsp.clone();
            }
            // Binary events have been demoted by the time the body decoded.
            PacketType::Event if packet.id >= 0 => {
                let ack = Packet {
                    packet_type: PacketType::Ack,
                    nsp: shared.namespace.read().ignore_poison().clone(),
                    id: packet.id,
                    data: Some(Value::Array(reply)),
                    attachment_count: 0,
                    attachments: Vec::new(),
                };
                Encoder::new(&**conn).encode(ack)?;
            }
            PacketType::Disconnect => return Ok(ExitReason::Disconnect),
            PacketType::Error => return Ok(ExitReason::ServerError),
            _ => {}
        }
    }
}

/// Dispatch a synthetic (client-generated) packet to user handlers.
fn dispatch_synthetic(shared: &Arc<Shared>, packet: &mut Packet) {
    let frames = NoFrames;
    let mut decoder = Decoder::new(&frames);
    if let Err(err) = dispatch(shared, None, &mut decoder, packet) {
        debug!("Handler for {:?} failed: {}", packet.packet_type, err);
    }
}

/// The dispatch table: route one packet to the right handler and collect
/// the values for an acknowledgement reply.
fn dispatch<R: crate::protocol::FrameReader>(
    shared: &Arc<Shared>,
    conn: Option<&Arc<Connection>>,
    decoder: &mut Decoder<'_, R>,
    packet: &mut Packet,
) -> Result<Vec<Value>> {
    let event = match packet.packet_type {
        PacketType::Connect => {
            if let Some(conn) = conn {
                *shared.session_id.write().ignore_poison() = conn.session_id();
                debug!("Connected, session {}", conn.session_id());
            }
            ON_CONNECTION
        }
        PacketType::Connecting => ON_CONNECTING,
        PacketType::ReconnectFailed => ON_RECONNECT_FAILED,
        PacketType::Disconnect => {
            if conn.is_some() {
                // A wire DISCONNECT ends the read loop; the teardown path
                // fires the handler exactly once via the synthetic packet.
                return Ok(Vec::new());
            }
            ON_DISCONNECTION
        }
        PacketType::Error => ON_ERROR,
        PacketType::Ack | PacketType::BinaryAck => return on_ack(shared, decoder, packet),
        PacketType::Event | PacketType::BinaryEvent => {
            decoder.decode_data(packet)?;
            let mut args = match packet.data.take() {
                Some(Value::Array(items)) => items,
                Some(other) => vec![other],
                None => Vec::new(),
            };
            if args.is_empty() {
                return Err(ProtocolError::InvalidPacket.into());
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                _ => return Err(ProtocolError::InvalidPacket.into()),
            };
            trace!("Event {:?} with {} argument(s)", name, args.len());
            return shared.fire(&name, args);
        }
    };

    // Reserved events may still carry a body, e.g. an ERROR message.
    decoder.decode_data(packet)?;
    let args = match packet.data.take() {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    };
    shared.fire(event, args)
}

/// Correlate an ACK with the emit that requested it and consume the entry.
fn on_ack<R: crate::protocol::FrameReader>(
    shared: &Arc<Shared>,
    decoder: &mut Decoder<'_, R>,
    packet: &mut Packet,
) -> Result<Vec<Value>> {
    // Decode unconditionally: a binary ack's attachment frames must be
    // consumed even when nobody is waiting for the reply.
    decoder.decode_data(packet)?;
    let handler = shared.acks.lock().ignore_poison().remove(&packet.id);
    let handler = match handler {
        Some(handler) => handler,
        None => {
            trace!("Dropping ack {} with no registered handler", packet.id);
            return Ok(Vec::new());
        }
    };
    let mut args = match packet.data.take() {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    };
    args.resize(handler.arity(), Value::Null);
    // The ack callback's own result is discarded: a failure in its body
    // must not tear down the connection. Only decode errors propagate.
    if let Err(err) = handler.call(args) {
        debug!("Ack handler for id {} failed: {}", packet.id, err);
    }
    Ok(Vec::new())
}

/// Frame source for synthetic packets, which never read from the wire.
struct NoFrames;

impl crate::protocol::FrameReader for NoFrames {
    fn next_reader(&self) -> Result<crate::engine::PacketReader> {
        Err(Error::ConnectionClosed)
    }
}
