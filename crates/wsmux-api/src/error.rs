use thiserror::Error;

/// Top-level error type for the `wsmux-api` crate.
///
/// Transport failures are never returned from `Connector::open`; they travel
/// through the transport's event stream as `TransportEvent::Error`. The only
/// synchronous failures are the ones `Transport::send` reports.
#[derive(Debug, Error)]
pub enum Error {
    // ── Establishment ───────────────────────────────────────────────
    /// WebSocket handshake failed (DNS, TCP, TLS, or HTTP upgrade).
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// Handshake did not finish within the configured timeout.
    #[error("WebSocket connection timed out after {timeout_secs}s")]
    ConnectTimeout { timeout_secs: u64 },

    /// The locator could not be turned into a WebSocket request.
    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    // ── Established connection ──────────────────────────────────────
    /// Read or write failure on an open WebSocket.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    // ── Send path ───────────────────────────────────────────────────
    /// The transport is not in the open state.
    #[error("Transport is not open")]
    NotOpen,

    /// The outbound queue is saturated.
    #[error("Outbound buffer full ({capacity} frames)")]
    SendBufferFull { capacity: usize },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_) | Self::ConnectTimeout { .. } | Self::SendBufferFull { .. }
        )
    }

    /// Returns `true` if the error happened before the transport opened.
    pub fn is_establishment(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_) | Self::ConnectTimeout { .. } | Self::InvalidUrl(_)
        )
    }
}
