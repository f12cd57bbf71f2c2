// ── Connection entry ──
//
// One registered transport plus the consumers attached to it. Listeners,
// reference count and the deferred-close timer live under a single short
// mutex; callbacks always run on a snapshot taken outside it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tracing::{debug, info};
use uuid::Uuid;
use wsmux_api::{ReadyState, Transport, TransportEvent};

use crate::grace::GraceTimer;
use crate::listener::Listener;
use crate::registry::{SessionInfo, SessionTable};

/// Unique identity of one created transport entry.
///
/// Two handles with the same `ConnectionId` share the same transport.
pub type ConnectionId = Uuid;

/// Identity of one attached listener within an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

struct EntryState {
    /// Attached consumers in attach order. `ref_count == listeners.len()`.
    listeners: Vec<(ListenerId, Arc<Listener>)>,
    ref_count: usize,
    close_timer: GraceTimer,
}

pub(crate) struct ConnectionEntry {
    id: ConnectionId,
    key: String,
    transport: Arc<dyn Transport>,
    opened_at: DateTime<Utc>,
    /// Runtime that opened the transport; grace timers are spawned here so a
    /// release from outside any runtime still works.
    runtime: Handle,
    state: Mutex<EntryState>,
}

impl ConnectionEntry {
    pub(crate) fn new(key: String, transport: Arc<dyn Transport>, runtime: Handle) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            transport,
            opened_at: Utc::now(),
            runtime,
            state: Mutex::new(EntryState {
                listeners: Vec::new(),
                ref_count: 0,
                close_timer: GraceTimer::new(),
            }),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub(crate) fn ready_state(&self) -> ReadyState {
        self.transport.ready_state()
    }

    /// Only `Connecting` and `Open` transports may be handed to new consumers.
    pub(crate) fn is_reusable(&self) -> bool {
        !self.ready_state().is_terminal()
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.lock().ref_count
    }

    pub(crate) fn info(&self) -> SessionInfo {
        let st = self.lock();
        SessionInfo {
            key: self.key.clone(),
            connection_id: self.id,
            state: self.ready_state().into(),
            ref_count: st.ref_count,
            close_pending: st.close_timer.is_pending(),
            opened_at: self.opened_at,
        }
    }

    fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Reference counting ──────────────────────────────────────────

    /// Register a consumer. Cancels a pending close. Returns the new count.
    pub(crate) fn acquire(&self, listener_id: ListenerId, listener: Arc<Listener>) -> usize {
        let mut st = self.lock();
        if st.close_timer.cancel() {
            debug!(key = %self.key, connection_id = %self.id, "pending close cancelled by attach");
        }
        st.listeners.push((listener_id, listener));
        st.ref_count += 1;
        st.ref_count
    }

    /// Unregister a consumer and, if it was the last one, arm the deferred
    /// close. Returns the remaining count.
    pub(crate) fn release(
        self: &Arc<Self>,
        listener_id: ListenerId,
        grace: Duration,
        table: &Weak<SessionTable>,
    ) -> usize {
        let mut st = self.lock();
        let before = st.listeners.len();
        st.listeners.retain(|(id, _)| *id != listener_id);
        if st.listeners.len() < before {
            st.ref_count = st.ref_count.saturating_sub(1);
        }

        let remaining = st.ref_count;
        if remaining > 0 || self.ready_state().is_terminal() {
            return remaining;
        }

        let entry = Arc::clone(self);
        let table = Weak::clone(table);
        let armed = st.close_timer.schedule(&self.runtime, grace, move |ticket| {
            if let Some(table) = table.upgrade() {
                table.expire(&entry, ticket);
            }
        });
        if armed.is_some() {
            info!(
                key = %self.key,
                connection_id = %self.id,
                grace_secs = grace.as_secs(),
                "last consumer detached, close scheduled"
            );
        }
        remaining
    }

    // ── Timer control ───────────────────────────────────────────────

    pub(crate) fn cancel_timer(&self) -> bool {
        self.lock().close_timer.cancel()
    }

    /// Run `f` against the timer state while holding the entry lock.
    pub(crate) fn with_timer<R>(&self, f: impl FnOnce(&mut GraceTimer, usize) -> R) -> R {
        let mut st = self.lock();
        let refs = st.ref_count;
        f(&mut st.close_timer, refs)
    }

    // ── Fan-out ─────────────────────────────────────────────────────

    fn snapshot(&self) -> Vec<Arc<Listener>> {
        self.lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    /// Deliver `event` to every listener attached when the call starts.
    ///
    /// Listeners that detach mid-delivery still receive this event; listeners
    /// that attach mid-delivery first hear the next one.
    pub(crate) fn dispatch(&self, event: &TransportEvent) {
        for listener in self.snapshot() {
            listener.dispatch(event);
        }
    }
}
