//! Byte transports carrying MQTT packets: plain TCP or binary WebSocket
//! frames.
//!
//! A link is opened once per connection attempt and immediately split into a
//! [`LinkReader`] and a [`LinkWriter`] so the session worker can wait for
//! inbound packets while it writes outbound ones.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rcctl_types::RcError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::codec::Packet;
use crate::config::{BrokerConfig, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket subprotocol brokers expect for MQTT.
const WS_SUBPROTOCOL: &str = "mqtt";

const READ_CHUNK: usize = 4096;

/// Open a link to the broker described by `config`.
pub async fn open(config: &BrokerConfig) -> Result<(LinkReader, LinkWriter), RcError> {
    match config.transport {
        Transport::Tcp => {
            let stream = TcpStream::connect((config.host.as_str(), config.port))
                .await
                .map_err(|e| RcError::Connect(format!("{}: {e}", config.endpoint())))?;
            stream.set_nodelay(true)?;
            debug!(endpoint = %config.endpoint(), "tcp link open");
            let (rx, tx) = stream.into_split();
            Ok((
                LinkReader::new(ReadHalf::Tcp(rx)),
                LinkWriter(WriteHalf::Tcp(tx)),
            ))
        }
        Transport::Ws => {
            let url = config.ws_url();
            let mut request = url
                .as_str()
                .into_client_request()
                .map_err(|e| RcError::Connect(format!("{url}: {e}")))?;
            request.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                HeaderValue::from_static(WS_SUBPROTOCOL),
            );
            let (ws, _response) = connect_async(request)
                .await
                .map_err(|e| RcError::Connect(format!("{url}: {e}")))?;
            debug!(url = %url, "websocket link open");
            let (tx, rx) = ws.split();
            Ok((LinkReader::new(ReadHalf::Ws(rx)), LinkWriter(WriteHalf::Ws(tx))))
        }
    }
}

enum ReadHalf {
    Tcp(OwnedReadHalf),
    Ws(SplitStream<WsStream>),
}

enum WriteHalf {
    Tcp(OwnedWriteHalf),
    Ws(SplitSink<WsStream, Message>),
}

/// Inbound half.  Buffers partial packets across reads and frames.
pub struct LinkReader {
    inner: ReadHalf,
    buf: Vec<u8>,
}

impl LinkReader {
    fn new(inner: ReadHalf) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Wait for the next complete packet.
    ///
    /// Cancel-safe: bytes already received stay buffered if the future is
    /// dropped.
    pub async fn recv(&mut self) -> Result<Packet, RcError> {
        loop {
            if let Some((packet, used)) = Packet::decode(&self.buf)? {
                self.buf.drain(..used);
                trace!(?packet, "packet in");
                return Ok(packet);
            }
            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> Result<(), RcError> {
        match &mut self.inner {
            ReadHalf::Tcp(rx) => {
                let mut chunk = [0u8; READ_CHUNK];
                let n = rx.read(&mut chunk).await?;
                if n == 0 {
                    return Err(RcError::Io("connection closed by broker".into()));
                }
                self.buf.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            ReadHalf::Ws(rx) => loop {
                match rx.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        self.buf.extend_from_slice(&data);
                        return Ok(());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(RcError::Io("websocket closed by broker".into()));
                    }
                    Some(Ok(Message::Text(_))) => {
                        return Err(RcError::Protocol("unexpected text frame".into()));
                    }
                    // Ping/pong are answered by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(RcError::Io(e.to_string())),
                }
            },
        }
    }
}

/// Outbound half.
pub struct LinkWriter(WriteHalf);

impl LinkWriter {
    pub async fn send(&mut self, packet: &Packet) -> Result<(), RcError> {
        trace!(?packet, "packet out");
        let bytes = packet.encode();
        match &mut self.0 {
            WriteHalf::Tcp(tx) => {
                tx.write_all(&bytes).await?;
                tx.flush().await?;
            }
            WriteHalf::Ws(tx) => {
                tx.send(Message::Binary(bytes.into()))
                    .await
                    .map_err(|e| RcError::Io(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Close the write side.  Errors are ignored; the link is going away.
    pub async fn close(&mut self) {
        match &mut self.0 {
            WriteHalf::Tcp(tx) => {
                let _ = tx.shutdown().await;
            }
            WriteHalf::Ws(tx) => {
                let _ = tx.close().await;
            }
        }
    }
}
