// In-memory connector for registry tests. Each opened transport is
// recorded so tests can drive its event stream by hand.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use wsmux_api::transport::ReadyCell;
use wsmux_api::{CloseReason, Connector, Error, OpenedTransport, Payload, ReadyState, Transport, TransportEvent};

#[derive(Debug, Default)]
pub(crate) struct MockConnector {
    opened: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockConnector {
    pub(crate) fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub(crate) fn transport(&self, index: usize) -> Arc<MockTransport> {
        Arc::clone(&self.opened.lock().unwrap()[index])
    }

    pub(crate) fn last(&self) -> Arc<MockTransport> {
        Arc::clone(self.opened.lock().unwrap().last().unwrap())
    }
}

impl Connector for MockConnector {
    type Locator = str;

    fn open(&self, locator: &str) -> OpenedTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            locator: locator.to_owned(),
            state: ReadyCell::default(),
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            events: Mutex::new(Some(tx)),
        });
        self.opened.lock().unwrap().push(Arc::clone(&transport));
        OpenedTransport {
            transport,
            events: rx,
        }
    }
}

#[derive(Debug)]
pub(crate) struct MockTransport {
    pub(crate) locator: String,
    state: ReadyCell,
    sent: Mutex<Vec<Payload>>,
    close_calls: AtomicUsize,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl MockTransport {
    fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Complete the handshake.
    pub(crate) fn open(&self) {
        self.state.set(ReadyState::Open);
        self.emit(TransportEvent::Open);
    }

    pub(crate) fn message(&self, text: &str) {
        self.emit(TransportEvent::Message(Payload::from(text)));
    }

    /// Fail the handshake: error then abnormal close.
    pub(crate) fn fail(&self, error: Error) {
        self.state.set(ReadyState::Closed);
        self.emit(TransportEvent::Error(error));
        self.emit(TransportEvent::Close(CloseReason::abnormal("connection failed")));
    }

    /// The peer closes the connection.
    pub(crate) fn remote_close(&self, code: u16, reason: &str) {
        self.state.set(ReadyState::Closed);
        self.emit(TransportEvent::Close(CloseReason::new(code, reason)));
    }

    /// Mark the transport dead without delivering any event yet.
    pub(crate) fn set_state(&self, state: ReadyState) {
        self.state.set(state);
    }

    /// Drop the event sender without a close event.
    pub(crate) fn hang_up(&self) {
        self.state.set(ReadyState::Closed);
        self.events.lock().unwrap().take();
    }

    pub(crate) fn sent(&self) -> Vec<Payload> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn send(&self, payload: Payload) -> Result<(), Error> {
        if self.state.get() != ReadyState::Open {
            return Err(Error::NotOpen);
        }
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if !self.state.get().is_terminal() {
            self.state.set(ReadyState::Closed);
            self.emit(TransportEvent::Close(CloseReason::normal("closed locally")));
        }
    }
}

/// Records every callback a listener receives as a short string.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub(crate) fn listener(&self) -> crate::Listener {
        let open = self.clone();
        let message = self.clone();
        let error = self.clone();
        let close = self.clone();
        crate::Listener::new()
            .on_open(move || open.push("open".to_owned()))
            .on_message(move |payload| {
                message.push(format!("message:{}", payload.as_text().unwrap_or("<binary>")));
            })
            .on_error(move |e| error.push(format!("error:{e}")))
            .on_close(move |reason| close.push(format!("close:{}", reason.code)))
    }

    pub(crate) fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Let spawned pump tasks drain their channels.
pub(crate) async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
