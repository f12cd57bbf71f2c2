// ── Registry configuration ──
//
// Runtime tuning for the connection registry. The CLI (or any other
// composition root) builds this and hands it in; core never reads files.

use std::time::Duration;

/// How long an unreferenced transport survives before it is closed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Configuration for a [`ConnectionRegistry`](crate::ConnectionRegistry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Grace period used by `attach` when the caller does not pass one.
    pub grace_period: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl RegistryConfig {
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}
