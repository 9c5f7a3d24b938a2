//! Transport Layer
//!
//! One persistent, bidirectional, message-oriented connection per
//! manager. Three stream flavors are supported behind one wrapper:
//! TCP and Unix sockets carry length-prefixed frames, WebSocket carries
//! the bare message body in binary frames.

use crate::error::{BindError, Result};
use futures_util::sink::SinkExt;
use futures_util::stream::{SplitSink, SplitStream, StreamExt};
use std::path::PathBuf;
use tokio::net::{tcp, unix, TcpStream, UnixStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;
use wire::WireMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Parsed connection endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// host:port
    Tcp(String),
    /// ws://... or wss://...
    WebSocket(Url),
    /// unix:<path>
    Unix(PathBuf),
}

impl Endpoint {
    /// Parse an address string into an endpoint.
    ///
    /// `ws://` and `wss://` select WebSocket, a `unix:` prefix selects
    /// a Unix socket path, anything else is treated as `host:port` TCP
    /// (an optional `tcp://` prefix is stripped).
    pub fn parse(address: &str) -> Result<Self> {
        if address.starts_with("ws://") || address.starts_with("wss://") {
            let url = Url::parse(address)
                .map_err(|e| BindError::connection_with_source("Invalid WebSocket URL", e))?;
            return Ok(Endpoint::WebSocket(url));
        }
        if let Some(path) = address.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(BindError::connection("Empty Unix socket path"));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        let addr = address.strip_prefix("tcp://").unwrap_or(address);
        if !addr.contains(':') {
            return Err(BindError::connection(format!(
                "Address '{}' is not host:port, ws(s)://, or unix:",
                address
            )));
        }
        Ok(Endpoint::Tcp(addr.to_string()))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
            Endpoint::WebSocket(url) => write!(f, "{}", url),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Read half of an established transport
pub(crate) enum TransportReader {
    Tcp(tcp::OwnedReadHalf),
    Unix(unix::OwnedReadHalf),
    Ws(SplitStream<WsStream>),
}

/// Write half of an established transport
pub(crate) enum TransportWriter {
    Tcp(tcp::OwnedWriteHalf),
    Unix(unix::OwnedWriteHalf),
    Ws(SplitSink<WsStream, WsMessage>),
}

/// Establish the transport and split it for independent read/write tasks
pub(crate) async fn establish(endpoint: &Endpoint) -> Result<(TransportReader, TransportWriter)> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr).await.map_err(|e| {
                BindError::connection_with_source(format!("Failed to connect to {}", addr), e)
            })?;
            debug!(%addr, "TCP transport established");
            let (read, write) = stream.into_split();
            Ok((TransportReader::Tcp(read), TransportWriter::Tcp(write)))
        }
        Endpoint::Unix(path) => {
            let stream = UnixStream::connect(path).await.map_err(|e| {
                BindError::connection_with_source(
                    format!("Failed to connect to {:?}", path),
                    e,
                )
            })?;
            debug!(path = %path.display(), "Unix transport established");
            let (read, write) = stream.into_split();
            Ok((TransportReader::Unix(read), TransportWriter::Unix(write)))
        }
        Endpoint::WebSocket(url) => {
            let (ws, _response) = connect_async(url.as_str()).await.map_err(|e| {
                BindError::connection_with_source(format!("Failed to connect to {}", url), e)
            })?;
            debug!(%url, "WebSocket transport established");
            let (sink, stream) = ws.split();
            Ok((TransportReader::Ws(stream), TransportWriter::Ws(sink)))
        }
    }
}

impl TransportWriter {
    /// Transmit one message
    pub(crate) async fn send(&mut self, message: &WireMessage, max_frame_size: usize) -> Result<()> {
        match self {
            TransportWriter::Tcp(stream) => {
                wire::write_frame(stream, message, max_frame_size).await?
            }
            TransportWriter::Unix(stream) => {
                wire::write_frame(stream, message, max_frame_size).await?
            }
            TransportWriter::Ws(sink) => {
                let body = wire::encode_body(message)?;
                if body.len() > max_frame_size {
                    return Err(wire::WireError::FrameTooLarge {
                        size: body.len(),
                        limit: max_frame_size,
                    }
                    .into());
                }
                sink.send(WsMessage::Binary(body))
                    .await
                    .map_err(|e| BindError::connection_with_source("WebSocket send failed", e))?;
            }
        }
        Ok(())
    }
}

impl TransportReader {
    /// Receive the next message; `Ok(None)` means the peer closed cleanly
    pub(crate) async fn recv(&mut self, max_frame_size: usize) -> Result<Option<WireMessage>> {
        match self {
            TransportReader::Tcp(stream) => Ok(wire::read_frame(stream, max_frame_size).await?),
            TransportReader::Unix(stream) => Ok(wire::read_frame(stream, max_frame_size).await?),
            TransportReader::Ws(stream) => loop {
                match stream.next().await {
                    Some(Ok(WsMessage::Binary(body))) => {
                        if body.len() > max_frame_size {
                            return Err(wire::WireError::FrameTooLarge {
                                size: body.len(),
                                limit: max_frame_size,
                            }
                            .into());
                        }
                        return Ok(Some(wire::decode_body(&body)?));
                    }
                    // Control frames are handled by tungstenite; text has
                    // no meaning on this protocol
                    Some(Ok(WsMessage::Text(_))) => {
                        warn!("Dropping unexpected text frame");
                        continue;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return Err(BindError::connection_with_source(
                            "WebSocket receive failed",
                            e,
                        ))
                    }
                }
            },
        }
    }
}
