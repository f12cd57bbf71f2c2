// ── Listener callback bundles ──
//
// A consumer registers one `Listener` per attach. Every callback is
// optional; missing ones simply ignore the event.

use std::fmt;

use wsmux_api::{CloseReason, Error, Payload, TransportEvent};

type OpenFn = Box<dyn Fn() + Send + Sync>;
type CloseFn = Box<dyn Fn(&CloseReason) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&Error) + Send + Sync>;
type MessageFn = Box<dyn Fn(&Payload) + Send + Sync>;

/// Event callbacks for one attached consumer.
///
/// ```rust,ignore
/// let listener = Listener::new()
///     .on_open(|| tracing::info!("terminal ready"))
///     .on_message(|payload| render(payload))
///     .on_close(|reason| tracing::info!(%reason, "terminal closed"));
/// ```
#[derive(Default)]
pub struct Listener {
    on_open: Option<OpenFn>,
    on_close: Option<CloseFn>,
    on_error: Option<ErrorFn>,
    on_message: Option<MessageFn>,
}

impl Listener {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_close(mut self, f: impl Fn(&CloseReason) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_message(mut self, f: impl Fn(&Payload) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    /// Invoke whichever callback matches `event`.
    pub(crate) fn dispatch(&self, event: &TransportEvent) {
        match event {
            TransportEvent::Open => {
                if let Some(f) = &self.on_open {
                    f();
                }
            }
            TransportEvent::Message(payload) => {
                if let Some(f) = &self.on_message {
                    f(payload);
                }
            }
            TransportEvent::Error(err) => {
                if let Some(f) = &self.on_error {
                    f(err);
                }
            }
            TransportEvent::Close(reason) => {
                if let Some(f) = &self.on_close {
                    f(reason);
                }
            }
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_message", &self.on_message.is_some())
            .finish()
    }
}
