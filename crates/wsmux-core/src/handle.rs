// ── Consumer handle ──

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, trace};
use wsmux_api::{Payload, ReadyState};

use crate::entry::{ConnectionEntry, ConnectionId, ListenerId};
use crate::registry::SessionTable;

/// One consumer's attachment to a shared transport.
///
/// Exposes `send` and read-only state; the transport itself stays owned by
/// the registry. Dropping the handle detaches it.
#[must_use = "dropping a SessionHandle detaches it immediately"]
pub struct SessionHandle {
    table: Weak<SessionTable>,
    entry: Arc<ConnectionEntry>,
    listener: ListenerId,
    grace: Duration,
    detached: AtomicBool,
}

impl SessionHandle {
    pub(crate) fn new(
        table: Weak<SessionTable>,
        entry: Arc<ConnectionEntry>,
        listener: ListenerId,
        grace: Duration,
    ) -> Self {
        Self {
            table,
            entry,
            listener,
            grace,
            detached: AtomicBool::new(false),
        }
    }

    pub fn session_key(&self) -> &str {
        self.entry.key()
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.entry.id()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.entry.ready_state()
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Write `payload` to the transport if it is open.
    ///
    /// Anything sent while the transport is connecting, closing or closed is
    /// dropped without error. Returns whether the frame was handed over.
    pub fn send(&self, payload: impl Into<Payload>) -> bool {
        let state = self.ready_state();
        if state != ReadyState::Open {
            trace!(key = %self.session_key(), %state, "send dropped, transport not open");
            return false;
        }
        match self.entry.transport().send(payload.into()) {
            Ok(()) => true,
            Err(e) => {
                debug!(key = %self.session_key(), error = %e, "send dropped");
                false
            }
        }
    }

    /// Remove this consumer's listener and release its reference.
    ///
    /// The last detach arms the grace timer. Calling this more than once is
    /// harmless.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        let remaining = self.entry.release(self.listener, self.grace, &self.table);
        debug!(
            key = %self.session_key(),
            connection_id = %self.connection_id(),
            remaining,
            "consumer detached"
        );
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("key", &self.session_key())
            .field("connection_id", &self.connection_id())
            .field("state", &self.ready_state())
            .field("detached", &self.is_detached())
            .finish_non_exhaustive()
    }
}
