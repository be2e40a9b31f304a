//! Engine.IO connection layer: a framed packet channel over one WebSocket
//! with heartbeat, lifecycle, and concurrent reader/writer coordination.

pub mod packet;
pub mod transport;

pub use self::packet::{EnginePacketType, MessageKind, PacketEncoder, PacketReader};
pub use self::transport::Transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use log::*;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::util::LockResultExt;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Fully operational.
    Normal,
    /// The user asked to close; waiting for the transport to die.
    Closing,
    /// Terminal.
    Closed,
}

/// Session parameters sent by the server in the OPEN packet, in milliseconds.
#[derive(Debug, Deserialize)]
struct OpenInfo {
    sid: String,
    #[serde(rename = "pingTimeout")]
    ping_timeout: u64,
    #[serde(rename = "pingInterval")]
    ping_interval: u64,
}

/// One Engine.IO connection over one WebSocket transport.
///
/// Shared between the reader loop, the heartbeat loop, and the Socket layer
/// as `Arc<Connection>`. Every write to the transport is serialized through
/// a single write lock; inbound MESSAGE packets are handed to the consumer
/// one at a time, in arrival order.
pub struct Connection {
    transport: RwLock<Arc<Transport>>,
    state: RwLock<State>,
    writer_lock: Mutex<()>,
    session_id: RwLock<String>,
    ping_interval: RwLock<Duration>,
    ping_timeout: RwLock<Duration>,
    reader_tx: Mutex<Option<SyncSender<PacketReader>>>,
    reader_rx: Mutex<Receiver<PacketReader>>,
    pong_tx: Mutex<Option<SyncSender<()>>>,
    pong_rx: Mutex<Receiver<()>>,
    ask_for_closed: AtomicBool,
}

impl Connection {
    /// Dial the transport and spawn the reader loop.
    pub fn open(uri: &url::Url) -> Result<Arc<Connection>> {
        let transport = Arc::new(Transport::connect(uri)?);
        let (reader_tx, reader_rx) = mpsc::sync_channel(1);
        let (pong_tx, pong_rx) = mpsc::sync_channel(1);
        let conn = Arc::new(Connection {
            transport: RwLock::new(transport),
            state: RwLock::new(State::Normal),
            writer_lock: Mutex::new(()),
            session_id: RwLock::new(String::new()),
            ping_interval: RwLock::new(Duration::from_secs(5)),
            ping_timeout: RwLock::new(Duration::from_secs(10)),
            reader_tx: Mutex::new(Some(reader_tx)),
            reader_rx: Mutex::new(reader_rx),
            pong_tx: Mutex::new(Some(pong_tx)),
            pong_rx: Mutex::new(pong_rx),
            ask_for_closed: AtomicBool::new(false),
        });
        let reader = conn.clone();
        thread::Builder::new()
            .name("socketio-conn-reader".into())
            .spawn(move || reader.read_loop())?;
        Ok(conn)
    }

    /// The session id assigned by the server at OPEN.
    pub fn session_id(&self) -> String {
        self.session_id.read().ignore_poison().clone()
    }

    /// Whether [`close`](Connection::close) came from the user rather than a
    /// transport failure.
    pub fn ask_for_closed(&self) -> bool {
        self.ask_for_closed.load(Ordering::Acquire)
    }

    /// Mark the upcoming close as user-initiated.
    pub fn set_ask_for_closed(&self) {
        self.ask_for_closed.store(true, Ordering::Release);
    }

    /// Block until the next inbound MESSAGE packet.
    ///
    /// Returns [`Error::ConnectionClosed`] once the connection is closed.
    pub fn next_reader(&self) -> Result<PacketReader> {
        if self.state() == State::Closed {
            return Err(Error::ConnectionClosed);
        }
        let rx = self.reader_rx.lock().ignore_poison();
        rx.recv().map_err(|_| Error::ConnectionClosed)
    }

    /// Write every frame of one Socket.IO packet under a single write-lock
    /// acquisition, as consecutive Engine.IO MESSAGE packets.
    ///
    /// Holding the lock across the whole packet keeps a concurrent emit from
    /// splicing between a binary event's header frame and its attachments.
    pub fn write_frames(&self, frames: Vec<(MessageKind, Vec<u8>)>) -> Result<()> {
        let _guard = self.writer_lock.lock().ignore_poison();
        if self.state() != State::Normal {
            return Err(Error::ConnectionClosed);
        }
        let transport = self.current_transport();
        for (kind, payload) in frames {
            transport.write_packet(kind, EnginePacketType::Message, &payload)?;
        }
        Ok(())
    }

    /// Close the connection: send an Engine.IO CLOSE packet, terminate the
    /// transport, and transition to `Closing`.
    ///
    /// A no-op in any state but `Normal`. The reader loop observes the dead
    /// transport and completes the transition to `Closed`.
    pub fn close(&self) {
        if self.state() != State::Normal {
            return;
        }
        {
            let _guard = self.writer_lock.lock().ignore_poison();
            self.current_transport()
                .write_packet(MessageKind::Text, EnginePacketType::Close, b"")
                .ok();
        }
        self.current_transport().close();
        self.set_state(State::Closing);
    }

    /// Discard buffered inbound readers until the reader channel closes.
    ///
    /// Called by the consumer on teardown so the reader loop is never left
    /// blocked on the single-reader handoff.
    pub fn drain(&self) {
        let rx = self.reader_rx.lock().ignore_poison();
        while rx.recv().is_ok() {}
    }

    fn read_loop(self: Arc<Self>) {
        let current = self.current_transport();
        loop {
            match current.next_reader() {
                Ok(reader) => Connection::on_packet(&self, &reader),
                Err(err) => {
                    trace!("Reader loop exiting: {}", err);
                    break;
                }
            }
        }
        self.on_close(&current);
    }

    fn on_packet(conn: &Arc<Connection>, reader: &PacketReader) {
        if conn.state() != State::Normal {
            return;
        }
        match reader.packet_type() {
            EnginePacketType::Open => Connection::on_open(conn, reader.payload()),
            EnginePacketType::Close => conn.current_transport().close(),
            EnginePacketType::Ping => {
                // Echo the payload back, then treat the exchange as proof of
                // liveness: a server-initiated ping keeps the timer fed.
                {
                    let _guard = conn.writer_lock.lock().ignore_poison();
                    conn.current_transport()
                        .write_packet(MessageKind::Text, EnginePacketType::Pong, reader.payload())
                        .ok();
                }
                conn.signal_pong();
            }
            EnginePacketType::Pong => conn.signal_pong(),
            EnginePacketType::Message => {
                let tx = conn.reader_tx.lock().ignore_poison().clone();
                if let Some(tx) = tx {
                    // Rendezvous-sized channel: blocks until the consumer is
                    // at most one frame behind, which keeps frames ordered
                    // and the transport reader single-threaded.
                    tx.send(reader.clone()).ok();
                }
            }
            EnginePacketType::Upgrade | EnginePacketType::Noop => {}
        }
    }

    fn on_open(conn: &Arc<Connection>, payload: &[u8]) {
        let info: OpenInfo = match serde_json::from_slice(payload) {
            Ok(info) => info,
            Err(err) => {
                // A malformed OPEN is fatal for this transport.
                debug!("Malformed OPEN packet: {}", err);
                conn.current_transport().close();
                return;
            }
        };
        debug!(
            "Session {} open, pingInterval={}ms pingTimeout={}ms",
            info.sid, info.ping_interval, info.ping_timeout
        );
        *conn.session_id.write().ignore_poison() = info.sid;
        *conn.ping_interval.write().ignore_poison() =
            Duration::from_secs(info.ping_interval / 1000);
        *conn.ping_timeout.write().ignore_poison() =
            Duration::from_secs(info.ping_timeout / 1000);
        let heartbeat = conn.clone();
        thread::Builder::new()
            .name("socketio-heartbeat".into())
            .spawn(move || heartbeat.heartbeat_loop())
            .ok();
    }

    /// Heartbeat state machine.
    ///
    /// `last_ping` is the time of the last received pong, `last_try` the time
    /// of the last ping sent. Whichever deadline expires first decides the
    /// action: interval elapsed sends a PING, timeout elapsed declares the
    /// peer dead. Exits when the pong channel closes.
    fn heartbeat_loop(self: Arc<Self>) {
        let mut last_ping = Instant::now();
        let mut last_try = last_ping;
        let rx = self.pong_rx.lock().ignore_poison();
        loop {
            let interval = *self.ping_interval.read().ignore_poison();
            let timeout = *self.ping_timeout.read().ignore_poison();
            let now = Instant::now();
            let after_ping = interval.saturating_sub(now - last_try);
            let after_timeout = timeout.saturating_sub(now - last_ping);
            match rx.recv_timeout(after_ping.min(after_timeout)) {
                Ok(()) => {
                    last_ping = Instant::now();
                    last_try = last_ping;
                }
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    if now - last_ping >= timeout {
                        warn!("Ping timeout, closing connection");
                        self.close();
                        return;
                    }
                    if now - last_try >= interval {
                        let _guard = self.writer_lock.lock().ignore_poison();
                        if self.state() != State::Normal {
                            return;
                        }
                        self.current_transport()
                            .write_packet(MessageKind::Text, EnginePacketType::Ping, b"")
                            .ok();
                        last_try = Instant::now();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// Complete the transition to `Closed` and tear down the channels.
    ///
    /// The state change happens before the senders drop, so the heartbeat
    /// loop observes a disconnected channel only after the connection is
    /// already closed.
    fn on_close(&self, transport: &Arc<Transport>) {
        if !Arc::ptr_eq(transport, &self.current_transport()) {
            return;
        }
        transport.close();
        self.set_state(State::Closed);
        self.reader_tx.lock().ignore_poison().take();
        self.pong_tx.lock().ignore_poison().take();
        if self.ask_for_closed() {
            trace!("Connection closed at the user's request");
        } else {
            trace!("Connection closed after transport failure");
        }
    }

    fn signal_pong(&self) {
        let tx = self.pong_tx.lock().ignore_poison().clone();
        if let Some(tx) = tx {
            // A full buffer already carries an unprocessed liveness signal;
            // dropping this one loses nothing.
            tx.try_send(()).ok();
        }
    }

    fn state(&self) -> State {
        *self.state.read().ignore_poison()
    }

    fn set_state(&self, state: State) {
        *self.state.write().ignore_poison() = state;
    }

    fn current_transport(&self) -> Arc<Transport> {
        self.transport.read().ignore_poison().clone()
    }
}
