//! Request execution with reconnect and retry.
//!
//! [`QueryExecutor::execute`] runs one logical request to completion:
//!
//! | Failure | Class | Action |
//! |---------|-------|--------|
//! | `TransportClosed` | Transient | Reconnect, retry, then `RetriesExhausted` |
//! | GraphQL errors | Query | Return immediately |
//! | Auth, timeouts, closed manager | Fatal | Return immediately |
//! | anything else | Unknown | Retry, then return as-is |
//!
//! A transport failure seen while the manager is closing or closed means the
//! caller's own `close()` tore the session down. It is reported as
//! [`Error::SessionClosed`] instead of reconnecting.
//!
//! Retries share one [`BackoffState`](crate::backoff::BackoffState) per call,
//! so concurrent callers never affect each other's attempt counts.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::error::{Error, ErrorClass, Result};
use crate::protocol::{Request, Response};
use crate::session::SessionManager;
use crate::session::manager::DispatchFailure;

// ============================================================================
// QueryExecutor
// ============================================================================

/// Executes requests against the manager's live session.
pub struct QueryExecutor {
    manager: Arc<SessionManager>,
    policy: BackoffPolicy,
}

impl QueryExecutor {
    /// Creates an executor retrying under `policy`.
    #[must_use]
    pub fn new(manager: Arc<SessionManager>, policy: BackoffPolicy) -> Self {
        Self { manager, policy }
    }

    /// Returns the retry policy.
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Executes `request`, reconnecting and retrying as needed.
    ///
    /// # Errors
    ///
    /// - [`Error::Query`] if the API rejected the request
    /// - [`Error::RetriesExhausted`] if the transport kept closing
    /// - [`Error::ConnectTimeout`] / [`Error::Auth`] from connecting
    /// - [`Error::SessionClosed`] if the manager was closed mid-request
    /// - the last unknown error once the attempt budget is spent
    pub async fn execute(&self, request: &Request) -> Result<Response> {
        let mut backoff = self.policy.start();

        loop {
            self.manager.connect().await?;

            let DispatchFailure { session, error } = match self.manager.dispatch(request).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };

            let class = error.class();
            match class {
                ErrorClass::Query => {
                    debug!(error = %error, "Request rejected by API");
                    return Err(error);
                }
                ErrorClass::Fatal => return Err(error),
                ErrorClass::Transient => {
                    let state = self.manager.state();
                    if state.is_terminal() {
                        debug!(error = %error, %state, "Session closed with request in flight");
                        return Err(Error::SessionClosed);
                    }
                    if let Some(session) = session {
                        self.manager.request_reconnect(session);
                    }
                }
                ErrorClass::Unknown => {}
            }

            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        error = %error,
                        attempt = backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    sleep(delay).await;
                }
                None => {
                    warn!(error = %error, attempts = backoff.failures(), "Request failed, giving up");

                    return Err(match class {
                        ErrorClass::Transient => {
                            Error::retries_exhausted(backoff.failures(), error)
                        }
                        _ => error,
                    });
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
