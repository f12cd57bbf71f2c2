// ── Release-with-grace ──
//
// A single deferred action that can be cancelled before it fires. The
// registry arms one when an entry's reference count drops to zero and
// cancels it when a new reference arrives inside the window.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Identifies one scheduling of a [`GraceTimer`].
///
/// Aborting a task cannot interrupt it once its final poll has started, so
/// a fired action must check that it is still the current one before
/// acting. Every `schedule` and `cancel` invalidates earlier tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTicket(u64);

/// At most one pending deferred action.
#[derive(Debug, Default)]
pub struct GraceTimer {
    pending: Option<JoinHandle<()>>,
    generation: u64,
}

impl GraceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Run `action` on `runtime` after `delay` unless cancelled first.
    ///
    /// Does nothing and returns `None` if an action is already pending. The
    /// caller does not need to be inside `runtime`.
    pub fn schedule<F>(&mut self, runtime: &Handle, delay: Duration, action: F) -> Option<TimerTicket>
    where
        F: FnOnce(TimerTicket) + Send + 'static,
    {
        if self.is_pending() {
            return None;
        }
        self.generation = self.generation.wrapping_add(1);
        let ticket = TimerTicket(self.generation);
        self.pending = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            action(ticket);
        }));
        Some(ticket)
    }

    /// Abort the pending action. Returns `true` if one was pending.
    pub fn cancel(&mut self) -> bool {
        self.generation = self.generation.wrapping_add(1);
        match self.pending.take() {
            Some(task) => {
                let was_pending = !task.is_finished();
                task.abort();
                was_pending
            }
            None => false,
        }
    }

    /// Whether `ticket` belongs to the latest scheduling and has not been
    /// cancelled since.
    pub fn is_current(&self, ticket: TimerTicket) -> bool {
        self.pending.is_some() && ticket.0 == self.generation
    }

    /// Forget the fired action identified by `ticket`. No-op for stale
    /// tickets.
    pub fn complete(&mut self, ticket: TimerTicket) {
        if ticket.0 == self.generation {
            self.pending = None;
        }
    }
}

impl Drop for GraceTimer {
    fn drop(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }
}
