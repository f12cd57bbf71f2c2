// ── Connection registry ──
//
// Maps session keys to shared transports. Attach reuses a live entry or
// opens a fresh one; the last detach arms a grace timer; transport-level
// closure removes the entry immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wsmux_api::{CloseReason, Connector, TransportEvent, WsConfig, WsConnector};

use crate::config::RegistryConfig;
use crate::entry::{ConnectionEntry, ConnectionId, ListenerId};
use crate::grace::TimerTicket;
use crate::handle::SessionHandle;
use crate::listener::Listener;

// ── Snapshots ───────────────────────────────────────────────────────

/// Aggregate counters over every registered session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Registered entries.
    pub sessions: usize,
    /// Entries with at least one attached consumer.
    pub active: usize,
    /// Entries with no consumers, waiting out their grace period.
    pub idle: usize,
    /// Sum of all reference counts.
    pub total_refs: usize,
}

/// Point-in-time view of one registered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// Session key the entry is registered under.
    pub key: String,
    /// Identity of the shared transport.
    pub connection_id: ConnectionId,
    /// Transport ready state in `snake_case`.
    pub state: &'static str,
    /// Attached consumers.
    pub ref_count: usize,
    /// Whether the grace timer is armed.
    pub close_pending: bool,
    /// When the transport was opened.
    pub opened_at: DateTime<Utc>,
}

// ── SessionTable ────────────────────────────────────────────────────

/// Key → entry storage shared by the registry, its handles and its timers.
///
/// Handles, pumps and timers hold `Weak` references, so dropping the last
/// registry clone drops the table and closes whatever is left in it.
#[derive(Default)]
pub(crate) struct SessionTable {
    entries: DashMap<String, Arc<ConnectionEntry>>,
}

impl SessionTable {
    /// Grace timer callback: close `entry` if it is still registered, still
    /// idle, and `ticket` is still its current timer.
    pub(crate) fn expire(&self, entry: &Arc<ConnectionEntry>, ticket: TimerTicket) {
        let removed = self
            .entries
            .remove_if(entry.key(), |_, current| {
                Arc::ptr_eq(current, entry)
                    && entry.with_timer(|timer, refs| refs == 0 && timer.is_current(ticket))
            })
            .is_some();
        entry.with_timer(|timer, _| timer.complete(ticket));

        if removed {
            info!(
                key = %entry.key(),
                connection_id = %entry.id(),
                "grace period elapsed, closing idle connection"
            );
            entry.transport().close();
        } else {
            debug!(key = %entry.key(), "grace timer fired for a superseded entry");
        }
    }

    /// Remove `entry` only if it is the one currently registered for its key.
    pub(crate) fn remove_if_current(&self, entry: &Arc<ConnectionEntry>) -> bool {
        self.entries
            .remove_if(entry.key(), |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    fn drain(&self) -> Vec<Arc<ConnectionEntry>> {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|(_, entry)| entry))
            .collect()
    }
}

impl Drop for SessionTable {
    fn drop(&mut self) {
        let remaining = self.drain();
        if !remaining.is_empty() {
            debug!(count = remaining.len(), "registry dropped, closing remaining connections");
        }
        for entry in remaining {
            entry.cancel_timer();
            entry.transport().close();
        }
    }
}

// ── ConnectionRegistry ──────────────────────────────────────────────

struct RegistryInner<C> {
    connector: C,
    table: Arc<SessionTable>,
    config: RegistryConfig,
    next_listener: AtomicU64,
}

/// Shares one live transport per session key among any number of consumers.
///
/// Cheap to clone; every clone refers to the same table. Construct one at
/// the composition root and pass it to whatever needs it.
///
/// ```rust,ignore
/// let registry = ConnectionRegistry::with_websocket(RegistryConfig::default(), WsConfig::default());
/// let handle = registry.attach("container-42", &url, Listener::new().on_message(render));
/// handle.send("ls -la\n");
/// drop(handle); // detach; transport survives the grace period
/// ```
///
/// `attach` must be called from within a Tokio runtime; the connection's
/// event pump and grace timer run on that runtime, so handles may be
/// detached or dropped from anywhere. A `Connector::open` implementation must not call back into the
/// registry: it runs while the key's slot is locked.
pub struct ConnectionRegistry<C: Connector> {
    inner: Arc<RegistryInner<C>>,
}

impl<C: Connector> Clone for ConnectionRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("config", &self.inner.config)
            .field("sessions", &self.inner.table.entries.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry<WsConnector> {
    /// Registry backed by real WebSocket transports.
    pub fn with_websocket(config: RegistryConfig, ws: WsConfig) -> Self {
        Self::new(WsConnector::new(ws), config)
    }
}

impl<C: Connector> ConnectionRegistry<C> {
    pub fn new(connector: C, config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connector,
                table: Arc::new(SessionTable::default()),
                config,
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    // ── Attach ──────────────────────────────────────────────────────

    /// Attach a consumer to `key`, using the configured grace period.
    pub fn attach(&self, key: impl Into<String>, locator: &C::Locator, listener: Listener) -> SessionHandle {
        self.attach_with_grace(key, locator, listener, self.inner.config.grace_period)
    }

    /// Attach a consumer to `key`.
    ///
    /// Reuses the registered transport if it is still connecting or open;
    /// otherwise opens a new one for `locator`, replacing any stale entry.
    /// Never fails: connection problems reach `listener` as `on_error`
    /// followed by `on_close`.
    ///
    /// `grace` is how long the transport survives after this handle turns out
    /// to be the last one detached.
    pub fn attach_with_grace(
        &self,
        key: impl Into<String>,
        locator: &C::Locator,
        listener: Listener,
        grace: Duration,
    ) -> SessionHandle {
        let key = key.into();
        if key.is_empty() {
            warn!("attach called with an empty session key");
        }

        let listener_id = ListenerId::new(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        let listener = Arc::new(listener);
        let mut fresh_events = None;

        let entry = match self.inner.table.entries.entry(key.clone()) {
            Entry::Occupied(slot) if slot.get().is_reusable() => {
                let entry = Arc::clone(slot.get());
                let refs = entry.acquire(listener_id, listener);
                debug!(key = %key, connection_id = %entry.id(), refs, "reusing live connection");
                entry
            }
            slot => {
                let opened = self.inner.connector.open(locator);
                let entry = Arc::new(ConnectionEntry::new(key.clone(), opened.transport, Handle::current()));
                entry.acquire(listener_id, listener);
                match slot {
                    Entry::Occupied(mut stale) => {
                        let stale = stale.insert(Arc::clone(&entry));
                        stale.cancel_timer();
                        debug!(
                            key = %key,
                            stale_id = %stale.id(),
                            state = %stale.ready_state(),
                            "replacing stale entry"
                        );
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(Arc::clone(&entry));
                    }
                }
                info!(key = %key, connection_id = %entry.id(), locator = ?locator, "opened new connection");
                fresh_events = Some(opened.events);
                entry
            }
        };

        if let Some(events) = fresh_events {
            entry.runtime().spawn(pump_events(
                Arc::downgrade(&self.inner.table),
                Arc::clone(&entry),
                events,
            ));
        }

        SessionHandle::new(Arc::downgrade(&self.inner.table), entry, listener_id, grace)
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub fn contains(&self, key: &str) -> bool {
        self.inner.table.entries.contains_key(key)
    }

    /// Reference count of the entry registered under `key`, if any.
    pub fn ref_count(&self, key: &str) -> Option<usize> {
        self.entry(key).map(|entry| entry.ref_count())
    }

    /// Connection id of the entry registered under `key`, if any.
    pub fn connection_id(&self, key: &str) -> Option<ConnectionId> {
        self.entry(key).map(|entry| entry.id())
    }

    pub fn len(&self) -> usize {
        self.inner.table.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.table.entries.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        self.sessions()
            .iter()
            .fold(RegistryStats::default(), |mut stats, session| {
                stats.sessions += 1;
                stats.total_refs += session.ref_count;
                if session.ref_count > 0 {
                    stats.active += 1;
                } else {
                    stats.idle += 1;
                }
                stats
            })
    }

    /// Every registered session, sorted by key.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let entries: Vec<Arc<ConnectionEntry>> = self
            .inner
            .table
            .entries
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        let mut sessions: Vec<SessionInfo> = entries.iter().map(|entry| entry.info()).collect();
        sessions.sort_by(|a, b| a.key.cmp(&b.key));
        sessions
    }

    fn entry(&self, key: &str) -> Option<Arc<ConnectionEntry>> {
        self.inner.table.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Remove every entry, cancel every timer and close every transport.
    ///
    /// Attached listeners still receive `on_close` as each transport reports
    /// it. The registry remains usable afterwards. Returns the number of
    /// sessions closed.
    pub fn shutdown(&self) -> usize {
        let entries = self.inner.table.drain();
        for entry in &entries {
            entry.cancel_timer();
            entry.transport().close();
        }
        info!(closed = entries.len(), "registry shut down");
        entries.len()
    }
}

// ── Event pump ──────────────────────────────────────────────────────

/// Fan every event of one transport out to its entry's listeners, then
/// unregister the entry once the transport has closed.
async fn pump_events(
    table: Weak<SessionTable>,
    entry: Arc<ConnectionEntry>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    let mut close = None;
    while let Some(event) = events.recv().await {
        match &event {
            TransportEvent::Open => {
                info!(key = %entry.key(), connection_id = %entry.id(), "connection open");
            }
            TransportEvent::Error(e) => {
                warn!(key = %entry.key(), connection_id = %entry.id(), error = %e, "transport error");
            }
            TransportEvent::Close(reason) => close = Some(reason.clone()),
            TransportEvent::Message(_) => {}
        }
        entry.dispatch(&event);
        if close.is_some() {
            break;
        }
    }

    let reason = match close {
        Some(reason) => reason,
        None => {
            let reason = CloseReason::abnormal("transport event stream ended");
            entry.dispatch(&TransportEvent::Close(reason.clone()));
            reason
        }
    };

    entry.cancel_timer();
    let removed = table.upgrade().is_some_and(|table| table.remove_if_current(&entry));
    info!(
        key = %entry.key(),
        connection_id = %entry.id(),
        %reason,
        removed,
        "connection closed"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use wsmux_api::{Error, Payload, ReadyState};

    use super::*;
    use crate::testing::{MockConnector, Recorder, settle};

    const GRACE: Duration = Duration::from_secs(10 * 60);
    const URL: &str = "wss://console.example/terminal/42";

    fn registry() -> ConnectionRegistry<MockConnector> {
        ConnectionRegistry::new(MockConnector::default(), RegistryConfig::default())
    }

    // ── Sharing ─────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn concurrent_attaches_share_one_transport() {
        let registry = registry();
        let a = registry.attach("s", URL, Listener::new());
        let b = registry.attach("s", URL, Listener::new());
        let c = registry.attach("s", URL, Listener::new());

        assert_eq!(registry.connector().open_count(), 1);
        assert_eq!(registry.connector().last().locator, URL);
        assert_eq!(a.connection_id(), b.connection_id());
        assert_eq!(b.connection_id(), c.connection_id());
        assert_eq!(registry.ref_count("s"), Some(3));
        assert_eq!(
            registry.stats(),
            RegistryStats {
                sessions: 1,
                active: 1,
                idle: 0,
                total_refs: 3,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_get_distinct_transports() {
        let registry = registry();
        let a = registry.attach("a", URL, Listener::new());
        let b = registry.attach("b", URL, Listener::new());

        assert_eq!(registry.connector().open_count(), 2);
        assert_ne!(a.connection_id(), b.connection_id());
        let keys: Vec<String> = registry.sessions().into_iter().map(|s| s.key).collect();
        assert_eq!(keys, ["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn every_listener_receives_every_event_while_attached() {
        let registry = registry();
        let (first, second) = (Recorder::default(), Recorder::default());
        let _a = registry.attach("s", URL, first.listener());
        let b = registry.attach("s", URL, second.listener());

        let transport = registry.connector().last();
        transport.open();
        transport.message("hello");
        settle().await;

        b.detach();
        transport.message("after");
        settle().await;

        assert_eq!(first.events(), ["open", "message:hello", "message:after"]);
        assert_eq!(second.events(), ["open", "message:hello"]);
    }

    #[tokio::test(start_paused = true)]
    async fn late_attach_misses_earlier_events() {
        let registry = registry();
        let early = Recorder::default();
        let _a = registry.attach("s", URL, early.listener());
        let transport = registry.connector().last();
        transport.open();
        settle().await;

        let late = Recorder::default();
        let _b = registry.attach("s", URL, late.listener());
        transport.message("x");
        settle().await;

        assert_eq!(early.events(), ["open", "message:x"]);
        assert_eq!(late.events(), ["message:x"]);
    }

    // ── Grace period ────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn reattach_within_grace_reuses_transport() {
        let registry = registry();
        let first = registry.attach("s", URL, Listener::new());
        let id = first.connection_id();
        drop(first);
        assert_eq!(registry.stats().idle, 1);
        assert!(registry.sessions()[0].close_pending);

        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        let second = registry.attach("s", URL, Listener::new());
        assert_eq!(second.connection_id(), id);
        assert!(!registry.sessions()[0].close_pending);

        // The cancelled timer must not fire at its original deadline.
        tokio::time::sleep(Duration::from_secs(20 * 60)).await;
        assert_eq!(registry.connector().open_count(), 1);
        assert_eq!(registry.connector().last().close_calls(), 0);
        assert!(registry.contains("s"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_transport_closes_after_grace() {
        let registry = registry();
        let handle = registry.attach("s", URL, Listener::new());
        let id = handle.connection_id();
        handle.detach();

        tokio::time::sleep(GRACE - Duration::from_secs(1)).await;
        assert!(registry.contains("s"));
        assert_eq!(registry.connector().last().close_calls(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert!(!registry.contains("s"));
        assert_eq!(registry.connector().transport(0).close_calls(), 1);

        let again = registry.attach("s", URL, Listener::new());
        assert_eq!(registry.connector().open_count(), 2);
        assert_ne!(again.connection_id(), id);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_comes_from_the_last_detaching_handle() {
        let registry = registry();
        let short = registry.attach_with_grace("s", URL, Listener::new(), Duration::from_secs(5));
        assert_eq!(short.grace_period(), Duration::from_secs(5));
        drop(short);

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert!(!registry.contains("s"));
        assert_eq!(registry.connector().last().close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_grace_closes_on_next_tick() {
        let registry = registry();
        registry
            .attach_with_grace("s", URL, Listener::new(), Duration::ZERO)
            .detach();
        assert!(registry.contains("s"));

        tokio::time::sleep(Duration::from_millis(1)).await;
        settle().await;
        assert!(!registry.contains("s"));
    }

    // ── Reference counting ──────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn repeated_detach_is_a_no_op() {
        let registry = registry();
        let a = registry.attach("s", URL, Listener::new());
        let _b = registry.attach("s", URL, Listener::new());

        a.detach();
        a.detach();
        assert!(a.is_detached());
        assert_eq!(registry.ref_count("s"), Some(1));
        drop(a);
        assert_eq!(registry.ref_count("s"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn ref_count_never_goes_negative() {
        let registry = registry();
        let handle = registry.attach("s", URL, Listener::new());
        handle.detach();
        handle.detach();
        drop(handle);

        assert_eq!(registry.ref_count("s"), Some(0));
        assert_eq!(registry.stats().total_refs, 0);

        tokio::time::sleep(GRACE + Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(registry.connector().last().close_calls(), 1);
    }

    // ── Send gating ─────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn send_only_reaches_an_open_transport() {
        let registry = registry();
        let handle = registry.attach("s", URL, Listener::new());
        let transport = registry.connector().last();

        assert_eq!(handle.ready_state(), ReadyState::Connecting);
        assert!(!handle.send("too early"));
        assert!(transport.sent().is_empty());

        transport.open();
        assert!(handle.is_open());
        assert!(handle.send("ls\n"));
        assert_eq!(transport.sent(), [Payload::from("ls\n")]);

        transport.remote_close(CloseReason::NORMAL, "bye");
        assert!(!handle.send("too late"));
        assert_eq!(transport.sent().len(), 1);
    }

    // ── Transport-level close ───────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn remote_close_removes_entry_and_next_attach_reconnects() {
        let registry = registry();
        let recorder = Recorder::default();
        let first = registry.attach("s", URL, recorder.listener());
        let transport = registry.connector().last();
        transport.open();
        transport.remote_close(CloseReason::GOING_AWAY, "server restart");
        settle().await;

        assert_eq!(recorder.events(), ["open", "close:1001"]);
        assert!(!registry.contains("s"));

        let second = registry.attach("s", URL, Listener::new());
        assert_eq!(registry.connector().open_count(), 2);
        assert_ne!(second.connection_id(), first.connection_id());

        // Detaching from the dead entry must not touch the live one.
        drop(first);
        assert_eq!(registry.ref_count("s"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_entry_is_never_reused() {
        let registry = registry();
        let first = registry.attach("s", URL, Listener::new());
        registry.connector().last().set_state(ReadyState::Closing);

        // Close event not yet processed; the entry is still registered.
        assert!(registry.contains("s"));
        let second = registry.attach("s", URL, Listener::new());
        assert_eq!(registry.connector().open_count(), 2);
        assert_ne!(second.connection_id(), first.connection_id());

        // The stale transport's eventual close must not unregister the new one.
        registry.connector().transport(0).remote_close(CloseReason::ABNORMAL, "");
        settle().await;
        assert_eq!(registry.connection_id("s"), Some(second.connection_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn establishment_failure_reaches_every_listener() {
        let registry = registry();
        let (a, b) = (Recorder::default(), Recorder::default());
        let _ha = registry.attach("s", URL, a.listener());
        let _hb = registry.attach("s", URL, b.listener());

        registry
            .connector()
            .last()
            .fail(Error::WebSocketConnect("connection refused".into()));
        settle().await;

        let expected = ["error:WebSocket connection failed: connection refused", "close:1006"];
        assert_eq!(a.events(), expected);
        assert_eq!(b.events(), expected);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn event_stream_ending_counts_as_abnormal_close() {
        let registry = registry();
        let recorder = Recorder::default();
        let _handle = registry.attach("s", URL, recorder.listener());
        registry.connector().last().hang_up();
        settle().await;

        assert_eq!(recorder.events(), ["close:1006"]);
        assert!(!registry.contains("s"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_never_removes_newer_entry() {
        let registry = registry();
        registry.attach("s", URL, Listener::new()).detach();
        registry
            .connector()
            .last()
            .remote_close(CloseReason::ABNORMAL, "");
        settle().await;
        assert!(!registry.contains("s"));

        let fresh = registry.attach("s", URL, Listener::new());
        tokio::time::sleep(GRACE * 2).await;
        settle().await;

        assert_eq!(registry.connection_id("s"), Some(fresh.connection_id()));
        assert_eq!(registry.connector().last().close_calls(), 0);
    }

    // ── Re-entrancy ─────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn detach_inside_callback_keeps_current_fan_out() {
        let registry = registry();
        let victim: Arc<Mutex<Option<SessionHandle>>> = Arc::default();
        let second = Recorder::default();

        let slot = Arc::clone(&victim);
        let _first = registry.attach(
            "s",
            URL,
            Listener::new().on_message(move |_| {
                slot.lock().unwrap().take();
            }),
        );
        *victim.lock().unwrap() = Some(registry.attach("s", URL, second.listener()));

        let transport = registry.connector().last();
        transport.open();
        transport.message("one");
        transport.message("two");
        settle().await;

        assert_eq!(second.events(), ["open", "message:one"]);
        assert_eq!(registry.ref_count("s"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn attach_inside_callback_does_not_deadlock() {
        let registry = registry();
        let spawned: Arc<Mutex<Vec<SessionHandle>>> = Arc::default();

        let (reg, sink) = (registry.clone(), Arc::clone(&spawned));
        let _first = registry.attach(
            "s",
            URL,
            Listener::new().on_open(move || {
                sink.lock().unwrap().push(reg.attach("s", URL, Listener::new()));
            }),
        );
        registry.connector().last().open();
        settle().await;

        assert_eq!(spawned.lock().unwrap().len(), 1);
        assert_eq!(registry.ref_count("s"), Some(2));
        assert_eq!(registry.connector().open_count(), 1);
    }

    // ── Teardown ────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_everything() {
        let registry = registry();
        let recorder = Recorder::default();
        let _a = registry.attach("a", URL, recorder.listener());
        registry.attach("b", URL, Listener::new()).detach();

        assert_eq!(registry.shutdown(), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.connector().transport(0).close_calls(), 1);
        assert_eq!(registry.connector().transport(1).close_calls(), 1);

        settle().await;
        assert_eq!(recorder.events(), ["close:1000"]);

        // The idle entry's timer was cancelled along with it.
        tokio::time::sleep(GRACE * 2).await;
        assert_eq!(registry.connector().transport(1).close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_registry_closes_transports() {
        let connector_view;
        let handle;
        {
            let registry = registry();
            handle = registry.attach("s", URL, Listener::new());
            connector_view = registry.connector().last();
        }
        assert_eq!(connector_view.close_calls(), 1);
        assert!(!handle.send("orphaned"));
        drop(handle);
    }

    #[test]
    fn handle_dropped_outside_runtime_closes_on_attach_runtime() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        let registry = registry();
        let handle = rt.block_on(async {
            let handle = registry.attach("s", URL, Listener::new());
            registry.connector().last().open();
            settle().await;
            handle
        });

        // No runtime context here; the release must still arm the timer.
        drop(handle);
        assert_eq!(registry.ref_count("s"), Some(0));
        assert!(registry.sessions()[0].close_pending);

        rt.block_on(async {
            tokio::time::sleep(GRACE + Duration::from_secs(1)).await;
            settle().await;
        });
        assert!(registry.is_empty());
        assert_eq!(registry.connector().last().close_calls(), 1);
    }

    // ── End to end ──────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn three_consumers_share_session_42() {
        let registry = registry();
        let (a, b, c) = (Recorder::default(), Recorder::default(), Recorder::default());

        let ha = registry.attach("session-42", URL, a.listener());
        let hb = registry.attach("session-42", URL, b.listener());
        let hc = registry.attach("session-42", URL, c.listener());
        assert_eq!(registry.connector().open_count(), 1);

        let transport = registry.connector().last();
        transport.open();
        transport.message("prompt$ ");
        settle().await;
        for recorder in [&a, &b, &c] {
            assert_eq!(recorder.events(), ["open", "message:prompt$ "]);
        }

        ha.detach();
        hb.detach();
        assert_eq!(registry.ref_count("session-42"), Some(1));

        hc.detach();
        assert_eq!(registry.ref_count("session-42"), Some(0));

        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        let d = Recorder::default();
        let hd = registry.attach("session-42", URL, d.listener());
        assert_eq!(hd.connection_id(), ha.connection_id());
        assert_eq!(registry.connector().open_count(), 1);

        transport.message("still here");
        settle().await;
        assert_eq!(d.events(), ["message:still here"]);
        assert_eq!(c.events().len(), 2);

        hd.detach();
        tokio::time::sleep(GRACE + Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(transport.close_calls(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_attaches_converge_on_one_transport() {
        let registry = registry();
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.attach("hot", URL, Listener::new()) })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        assert_eq!(registry.connector().open_count(), 1);
        assert_eq!(registry.ref_count("hot"), Some(32));
        let id = handles[0].connection_id();
        assert!(handles.iter().all(|h| h.connection_id() == id));

        handles.clear();
        assert_eq!(registry.ref_count("hot"), Some(0));
    }
}
