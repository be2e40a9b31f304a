//! WebSocket transport: dials the server and frames Engine.IO packets.

use std::io::Write as _;
use std::net::{Shutdown, TcpStream};
use std::sync::Mutex;

use bytes::Bytes;
use http::Response;
use log::*;
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::HandshakeError;
use tungstenite::protocol::{Role, WebSocket};
use tungstenite::Message;
use url::Url;

use crate::engine::packet::{EnginePacketType, MessageKind, PacketEncoder, PacketReader};
use crate::error::{Error, Result, UrlError};
use crate::util::LockResultExt;

const SOCKETIO_PATH: &str = "socket.io/";
const EIO_KEY: &str = "EIO";
const EIO_VERSION: &str = "3";
const TRANSPORT_KEY: &str = "transport";
const TRANSPORT_VALUE: &str = "websocket";

/// Rewrite a server URL into the Engine.IO WebSocket endpoint.
///
/// `http`/`https` become `ws`/`wss`, the path gains a `socket.io/` suffix
/// unless it already contains one, and the query gains `EIO=3` and
/// `transport=websocket` unless the caller supplied them.
pub fn socketio_url(uri: &Url) -> Result<Url> {
    let mut url = uri.clone();
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" => "ws",
        "wss" => "wss",
        other => return Err(UrlError::UnsupportedScheme(other.into()).into()),
    };
    url.set_scheme(scheme)
        .map_err(|_| UrlError::UnsupportedScheme(scheme.into()))?;

    if !url.path().to_ascii_lowercase().contains(SOCKETIO_PATH) {
        let path = format!("{}{}", url.path(), SOCKETIO_PATH);
        url.set_path(&path);
    }

    let has_eio = url.query_pairs().any(|(k, _)| k == EIO_KEY);
    let has_transport = url.query_pairs().any(|(k, _)| k == TRANSPORT_KEY);
    {
        let mut pairs = url.query_pairs_mut();
        if !has_eio {
            pairs.append_pair(EIO_KEY, EIO_VERSION);
        }
        if !has_transport {
            pairs.append_pair(TRANSPORT_KEY, TRANSPORT_VALUE);
        }
    }
    Ok(url)
}

/// A connected WebSocket carrying Engine.IO packets, one packet per frame.
///
/// The connection is split into independent read and write halves over
/// cloned sockets, so a reader blocked in [`next_reader`](Transport::next_reader)
/// never delays a write.
pub struct Transport {
    reader: Mutex<WebSocket<TcpStream>>,
    writer: Mutex<WebSocket<TcpStream>>,
    stream: TcpStream,
    response: Response<Option<Vec<u8>>>,
}

impl Transport {
    /// Dial the server and perform the WebSocket upgrade.
    pub fn connect(uri: &Url) -> Result<Transport> {
        let url = socketio_url(uri)?;
        if url.scheme() == "wss" {
            return Err(UrlError::TlsNotSupported.into());
        }
        let host = url.host_str().ok_or(UrlError::NoHostName)?;
        let port = url.port_or_known_default().ok_or(UrlError::NoPort)?;

        debug!("Dialing {}:{} for {}", host, port, url);
        let stream = TcpStream::connect((host, port))?;
        let request = url.as_str().into_client_request()?;
        let (reader, response) =
            tungstenite::client::client(request, stream.try_clone()?).map_err(|err| match err {
                HandshakeError::Failure(err) => Error::from(err),
                HandshakeError::Interrupted(_) => Error::from(tungstenite::Error::Io(
                    std::io::Error::new(std::io::ErrorKind::WouldBlock, "handshake interrupted"),
                )),
            })?;
        trace!("WebSocket upgrade complete: {}", response.status());
        let writer = WebSocket::from_raw_socket(stream.try_clone()?, Role::Client, None);

        Ok(Transport {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            stream,
            response,
        })
    }

    /// The HTTP response produced by the upgrade.
    pub fn response(&self) -> &Response<Option<Vec<u8>>> {
        &self.response
    }

    /// Block until the next Engine.IO packet arrives.
    ///
    /// WebSocket-level control frames are skipped; a close frame surfaces as
    /// [`Error::ConnectionClosed`].
    pub fn next_reader(&self) -> Result<PacketReader> {
        let mut ws = self.reader.lock().ignore_poison();
        loop {
            match ws.read()? {
                Message::Text(text) => {
                    return PacketReader::parse(MessageKind::Text, Bytes::from(text.into_bytes()))
                }
                Message::Binary(data) => {
                    return PacketReader::parse(MessageKind::Binary, Bytes::from(data))
                }
                Message::Close(_) => return Err(Error::ConnectionClosed),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    /// Write one Engine.IO packet as one WebSocket frame.
    pub fn write_packet(
        &self,
        kind: MessageKind,
        packet_type: EnginePacketType,
        payload: &[u8],
    ) -> Result<()> {
        let message = match kind {
            MessageKind::Text => {
                let mut enc = PacketEncoder::text(Vec::new(), packet_type)?;
                enc.write_all(payload)?;
                // The text framing keeps the payload verbatim, so the frame
                // stays valid UTF-8 whenever the payload is.
                let frame = String::from_utf8(enc.finish()?)
                    .map_err(|_| tungstenite::Error::Utf8)?;
                Message::Text(frame)
            }
            MessageKind::Binary => {
                let mut enc = PacketEncoder::binary(Vec::new(), packet_type)?;
                enc.write_all(payload)?;
                Message::Binary(enc.finish()?)
            }
        };
        let mut ws = self.writer.lock().ignore_poison();
        ws.send(message)?;
        Ok(())
    }

    /// Terminate the transport.
    ///
    /// Best effort: the close frame may already be unwritable. The TCP
    /// shutdown wakes a reader blocked in [`next_reader`](Transport::next_reader).
    pub fn close(&self) {
        if let Ok(mut ws) = self.writer.lock() {
            ws.close(None).ok();
            ws.flush().ok();
        }
        self.stream.shutdown(Shutdown::Both).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(input: &str) -> String {
        socketio_url(&Url::parse(input).unwrap()).unwrap().to_string()
    }

    #[test]
    fn rewrites_scheme_path_and_query() {
        assert_eq!(
            rewrite("http://localhost:5000"),
            "ws://localhost:5000/socket.io/?EIO=3&transport=websocket"
        );
        assert_eq!(
            rewrite("https://example.com/chat/"),
            "wss://example.com/chat/socket.io/?EIO=3&transport=websocket"
        );
    }

    #[test]
    fn preserves_existing_values() {
        assert_eq!(
            rewrite("ws://h/socket.io/?EIO=4"),
            "ws://h/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            rewrite("ws://h/?transport=polling&EIO=3"),
            "ws://h/socket.io/?transport=polling&EIO=3"
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        let url = Url::parse("ftp://h/").unwrap();
        assert!(matches!(
            socketio_url(&url),
            Err(Error::Url(UrlError::UnsupportedScheme(_)))
        ));
    }

    #[test]
    fn wss_needs_tls() {
        let url = Url::parse("https://localhost:1/").unwrap();
        assert!(matches!(
            Transport::connect(&url),
            Err(Error::Url(UrlError::TlsNotSupported))
        ));
    }
}
