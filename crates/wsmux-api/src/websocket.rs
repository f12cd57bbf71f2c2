//! WebSocket transport.
//!
//! [`WsConnector`] opens one tokio-tungstenite connection per call and drives
//! it from a background task. The returned [`Transport`] is a thin handle:
//! `send` pushes onto a bounded outbound queue, `close` cancels the task.
//! Every lifecycle change is reported on the event stream, in order, ending
//! with exactly one [`TransportEvent::Close`].
//!
//! No reconnection happens here: a dropped connection is reported as closed
//! and the owner decides what to do next.
//!
//! # Example
//!
//! ```rust,ignore
//! use wsmux_api::{Connector, TransportEvent, WsConfig, WsConnector};
//! use url::Url;
//!
//! let connector = WsConnector::new(WsConfig::default());
//! let url = Url::parse("wss://lab.example.com/terminal/42")?;
//! let mut opened = connector.open(&url);
//!
//! while let Some(event) = opened.events.recv().await {
//!     if let TransportEvent::Open = event {
//!         opened.transport.send("uptime\n".into())?;
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::transport::{
    CloseReason, Connector, OpenedTransport, Payload, ReadyCell, ReadyState, Transport,
    TransportEvent,
};

// ── WsConfig ─────────────────────────────────────────────────────────

/// Tuning for WebSocket transports.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Upper bound on the handshake. Default: 10s.
    pub connect_timeout: Duration,

    /// Frames that may wait in the outbound queue. Default: 256.
    pub outbound_buffer: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            outbound_buffer: 256,
        }
    }
}

// ── WsConnector ──────────────────────────────────────────────────────

/// Opens WebSocket transports. The locator is the endpoint URL.
///
/// Must be used from within a Tokio runtime; each `open` spawns a task.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    config: WsConfig,
}

impl WsConnector {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }
}

impl Connector for WsConnector {
    type Locator = Url;

    fn open(&self, locator: &Url) -> OpenedTransport {
        let capacity = self.config.outbound_buffer.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (event_tx, events) = mpsc::unbounded_channel();
        let state = ReadyCell::new(ReadyState::Connecting);
        let cancel = CancellationToken::new();

        let transport = Arc::new(WsTransport {
            url: locator.clone(),
            state: state.clone(),
            outbound: outbound_tx,
            capacity,
            cancel: cancel.clone(),
        });

        let session = WsSession {
            url: locator.clone(),
            connect_timeout: self.config.connect_timeout,
            state,
            events: event_tx,
            cancel,
        };
        tokio::spawn(session.run(outbound_rx));

        OpenedTransport { transport, events }
    }
}

// ── WsTransport ──────────────────────────────────────────────────────

/// Handle to one WebSocket connection.
pub struct WsTransport {
    url: Url,
    state: ReadyCell,
    outbound: mpsc::Sender<Message>,
    capacity: usize,
    cancel: CancellationToken,
}

impl fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsTransport")
            .field("url", &self.url.as_str())
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl Transport for WsTransport {
    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn send(&self, payload: Payload) -> Result<(), Error> {
        if self.state.get() != ReadyState::Open {
            return Err(Error::NotOpen);
        }
        let message = match payload {
            Payload::Text(text) => Message::text(text),
            Payload::Binary(bytes) => Message::binary(bytes),
        };
        self.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::SendBufferFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => Error::NotOpen,
        })
    }

    fn close(&self) {
        if self.state.transition(ReadyState::Open, ReadyState::Closing)
            || self.state.transition(ReadyState::Connecting, ReadyState::Closing)
        {
            tracing::debug!(url = %self.url, "closing WebSocket");
        }
        self.cancel.cancel();
    }
}

// ── Background connection task ───────────────────────────────────────

struct WsSession {
    url: Url,
    connect_timeout: Duration,
    state: ReadyCell,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
}

impl WsSession {
    /// Connect, pump frames until either side closes, then report `Close`.
    async fn run(self, outbound: mpsc::Receiver<Message>) {
        let reason = match self.establish().await {
            Ok(Some(stream)) => self.pump(stream, outbound).await,
            Ok(None) => CloseReason::normal("closed before open"),
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "WebSocket connect failed");
                self.emit(TransportEvent::Error(e));
                CloseReason::abnormal("connection failed")
            }
        };

        self.state.set(ReadyState::Closed);
        tracing::info!(url = %self.url, close = %reason, "WebSocket closed");
        self.emit(TransportEvent::Close(reason));
    }

    /// Returns `Ok(None)` when cancelled mid-handshake.
    async fn establish(&self) -> Result<Option<WsStream>, Error> {
        tracing::info!(url = %self.url, "Connecting to WebSocket");

        let connect = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(self.url.as_str()),
        );

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(None),
            result = connect => result,
        };

        let (stream, _response) = result
            .map_err(|_| Error::ConnectTimeout {
                timeout_secs: self.connect_timeout.as_secs(),
            })?
            .map_err(|e| match e {
                tungstenite::Error::Url(url_err) => Error::InvalidUrl(url_err.to_string()),
                other => Error::WebSocketConnect(other.to_string()),
            })?;

        // close() may have raced the handshake
        if !self.state.transition(ReadyState::Connecting, ReadyState::Open) {
            return Ok(None);
        }

        tracing::info!(url = %self.url, "WebSocket connected");
        self.emit(TransportEvent::Open);
        Ok(Some(stream))
    }

    async fn pump(&self, stream: WsStream, mut outbound: mpsc::Receiver<Message>) -> CloseReason {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    // Best effort: the peer may already be gone.
                    if let Err(e) = write.send(Message::Close(None)).await {
                        tracing::debug!(error = %e, "close frame not delivered");
                    }
                    return CloseReason::normal("closed locally");
                }
                Some(message) = outbound.recv() => {
                    if let Err(e) = write.send(message).await {
                        self.emit(TransportEvent::Error(Error::WebSocket(e.to_string())));
                        return CloseReason::abnormal("write failed");
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.emit(TransportEvent::Message(Payload::Text(text.as_str().to_owned())));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        self.emit(TransportEvent::Message(Payload::Binary(bytes)));
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("WebSocket ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        // Completes the handshake with the queued close reply.
                        if let Err(e) = write.flush().await {
                            tracing::debug!(error = %e, "close reply not delivered");
                        }
                        return frame.map_or_else(
                            || CloseReason::new(CloseReason::NORMAL, ""),
                            |cf| CloseReason::new(u16::from(cf.code), cf.reason.as_str().to_owned()),
                        );
                    }
                    Some(Ok(_)) => {
                        // Pong, raw Frame -- nothing to surface
                    }
                    Some(Err(e)) => {
                        self.emit(TransportEvent::Error(Error::WebSocket(e.to_string())));
                        return CloseReason::abnormal("read failed");
                    }
                    None => return CloseReason::abnormal("stream ended"),
                },
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.events.send(event);
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ── Tests ────────────────────────────────────────────────────────────
