//! WebSocket event stream to the Duet server.
//!
//! [`EventStream::connect`] opens `/ws?token=…`, spawns a background reader
//! that decodes each binary frame into a [`ServerEvent`], and hands the
//! receiving end of that channel back to the caller. Outbound
//! [`ClientEvent`]s go through [`EventStream::send`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use duet_proto::codec::{self, CodecError};
use duet_proto::event::{ClientEvent, ServerEvent};

type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Capacity of the inbound event channel.
const EVENT_BUFFER: usize = 256;

/// Errors from the event stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The handshake did not complete in time.
    #[error("connection timed out")]
    Timeout,

    /// The handshake failed or was refused.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The connection is gone.
    #[error("connection closed")]
    Closed,

    /// An outbound event did not encode.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A live event-stream connection.
pub struct EventStream {
    ws_sender: Arc<Mutex<WsSender>>,
    connected: Arc<AtomicBool>,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl EventStream {
    /// Connects to the event stream at `url` (which carries the token).
    ///
    /// Returns the stream and the receiver of decoded server events. The
    /// receiver yields `None` once the connection closes.
    ///
    /// # Errors
    ///
    /// [`StreamError::Timeout`] if the handshake exceeds `timeout`, and
    /// [`StreamError::Connect`] if it fails, including an unknown token.
    pub async fn connect(
        url: &Url,
        timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), StreamError> {
        let (ws_stream, _response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                tracing::warn!(host = url.host_str(), "event stream connect timed out");
                StreamError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(host = url.host_str(), error = %e, "event stream connect failed");
                StreamError::Connect(e.to_string())
            })?;
        tracing::info!(host = url.host_str(), "event stream connected");

        let (ws_sender, ws_reader) = ws_stream.split();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let connected = Arc::new(AtomicBool::new(true));
        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, Arc::clone(&connected)));

        Ok((
            Self {
                ws_sender: Arc::new(Mutex::new(ws_sender)),
                connected,
                _reader_handle: reader_handle,
            },
            rx,
        ))
    }

    /// Sends one event to the server.
    ///
    /// # Errors
    ///
    /// [`StreamError::Closed`] if the connection is gone, or
    /// [`StreamError::Codec`] if the event does not encode.
    pub async fn send(&self, event: &ClientEvent) -> Result<(), StreamError> {
        if !self.is_connected() {
            return Err(StreamError::Closed);
        }
        let bytes = codec::encode_client(event)?;
        let mut sender = self.ws_sender.lock().await;
        sender
            .send(WsMessage::Binary(bytes.into()))
            .await
            .map_err(|e| {
                tracing::warn!(event = event.name(), error = %e, "event stream send failed");
                self.connected.store(false, Ordering::Relaxed);
                StreamError::Closed
            })
    }

    /// Whether the connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Closes the connection.
    pub async fn close(&self) {
        let mut sender = self.ws_sender.lock().await;
        if let Err(e) = sender.close().await {
            tracing::debug!(error = %e, "event stream close failed");
        }
        self.connected.store(false, Ordering::Relaxed);
    }
}

async fn reader_loop(
    mut reader: WsReader,
    tx: mpsc::Sender<ServerEvent>,
    connected: Arc<AtomicBool>,
) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(WsMessage::Binary(data)) => match codec::decode_server(&data) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        tracing::debug!("event receiver dropped, stopping reader");
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "undecodable server event"),
            },
            Ok(WsMessage::Close(_)) => {
                tracing::info!("server closed event stream");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "event stream read failed");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
}
