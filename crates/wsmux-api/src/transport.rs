// ── Transport abstraction ──
//
// The registry never talks to a socket directly. It asks a `Connector` to
// open a `Transport` for an opaque locator and consumes the ordered event
// stream that comes back with it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Error;

// ── ReadyState ───────────────────────────────────────────────────────

/// Lifecycle state of a transport, mirroring the WebSocket `readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    /// `Closing` and `Closed` are terminal: the transport will never carry
    /// traffic again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Atomic cell holding a [`ReadyState`], shared between a transport and the
/// task driving it.
#[derive(Debug, Clone)]
pub struct ReadyCell(Arc<AtomicU8>);

impl ReadyCell {
    pub fn new(state: ReadyState) -> Self {
        Self(Arc::new(AtomicU8::new(state.to_u8())))
    }

    pub fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ReadyState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }

    /// Move from `from` to `to` only if the current state is `from`.
    pub fn transition(&self, from: ReadyState, to: ReadyState) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for ReadyCell {
    fn default() -> Self {
        Self::new(ReadyState::Connecting)
    }
}

// ── Payload ──────────────────────────────────────────────────────────

/// A raw frame passed through untouched in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

// ── CloseReason ──────────────────────────────────────────────────────

/// Why a transport closed. Codes follow RFC 6455.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const ABNORMAL: u16 = 1006;

    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(Self::NORMAL, reason)
    }

    /// Closure without a close frame (network drop, failed handshake).
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(Self::ABNORMAL, reason)
    }

    pub fn is_normal(&self) -> bool {
        self.code == Self::NORMAL
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "code {}: {}", self.code, self.reason)
        }
    }
}

// ── TransportEvent ───────────────────────────────────────────────────

/// One event emitted by a transport. A stream of these ends with exactly one
/// `Close`.
#[derive(Debug)]
pub enum TransportEvent {
    Open,
    Message(Payload),
    Error(Error),
    Close(CloseReason),
}

// ── Traits ───────────────────────────────────────────────────────────

/// A live bidirectional connection.
///
/// Implementations must be cheap to query and must never block: `send`
/// enqueues, `close` only requests shutdown.
pub trait Transport: Send + Sync + fmt::Debug {
    fn ready_state(&self) -> ReadyState;

    /// Write one frame. Fails with [`Error::NotOpen`] unless the transport is
    /// open.
    fn send(&self, payload: Payload) -> Result<(), Error>;

    /// Request shutdown. Idempotent; a `Close` event follows on the event
    /// stream once the connection is down.
    fn close(&self);
}

/// A freshly opened transport and the receiving side of its event stream.
pub struct OpenedTransport {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl fmt::Debug for OpenedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedTransport")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

/// Opens transports from an opaque locator.
///
/// `open` is synchronous and infallible: establishment happens in the
/// background and any failure arrives as `Error` + `Close` events.
pub trait Connector: Send + Sync + 'static {
    type Locator: fmt::Debug + Send + Sync + ?Sized;

    fn open(&self, locator: &Self::Locator) -> OpenedTransport;
}
