//! Session manager options.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::backoff::{BackoffPolicy, Budget};

// ============================================================================
// Constants
// ============================================================================

/// How long one `connect()` call waits for a session.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long one `close()` call waits for the loop to finish.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// SessionOptions
// ============================================================================

/// Timeouts and the connect backoff of a [`SessionManager`](super::SessionManager).
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Wait budget of one `connect()` call.
    pub connect_timeout: Duration,
    /// Wait budget of one `close()` call.
    pub close_timeout: Duration,
    /// Delay schedule between failed transport opens.
    pub connect_backoff: BackoffPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            connect_backoff: BackoffPolicy::connection(),
        }
    }
}

impl SessionOptions {
    /// Milliseconds reported when the connect budget runs out.
    pub(crate) fn connect_budget_ms(&self) -> u64 {
        match self.connect_backoff.budget() {
            Budget::Elapsed(limit) => limit.as_millis() as u64,
            Budget::Attempts(_) | Budget::Unbounded => self.connect_timeout.as_millis() as u64,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
