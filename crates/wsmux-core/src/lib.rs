//! Shared-connection registry sitting between `wsmux-api` transports and UI
//! consumers.
//!
//! Many consumers (terminal panels, log views, a CLI prompt) can attach to
//! the same logical session without opening duplicate transports:
//!
//! - **[`ConnectionRegistry`]** maps a session key to at most one live
//!   transport. [`attach`](ConnectionRegistry::attach) reuses a connecting or
//!   open transport, or opens a fresh one through the injected
//!   [`Connector`](wsmux_api::Connector).
//!
//! - **[`SessionHandle`]** is what a consumer holds: `send`, read-only state,
//!   and `detach` (also run on drop). When the last handle detaches, the
//!   transport survives a grace period so a quick remount reuses it.
//!
//! - **[`Listener`]** bundles the optional `on_open` / `on_message` /
//!   `on_error` / `on_close` callbacks. Every event of a transport is fanned
//!   out, in order, to the listeners attached when it arrives.
//!
//! - **[`GraceTimer`]** is the cancellable deferred action behind the grace
//!   period.

pub mod config;
pub mod entry;
pub mod grace;
pub mod handle;
pub mod listener;
pub mod registry;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{DEFAULT_GRACE_PERIOD, RegistryConfig};
pub use entry::ConnectionId;
pub use grace::{GraceTimer, TimerTicket};
pub use handle::SessionHandle;
pub use listener::Listener;
pub use registry::{ConnectionRegistry, RegistryStats, SessionInfo};
