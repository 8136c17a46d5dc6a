//! Connection state published by the connection loop.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::error::Error;
use crate::identifiers::SessionId;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle of the managed session.
///
/// ```text
/// Disconnected ──► Connecting ──► Connected ──► Closing ──► Closed
///                      ▲              │
///                      └──reconnect───┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No loop has run yet.
    #[default]
    Disconnected,
    /// Opening the transport, possibly backing off between attempts.
    Connecting,
    /// A session is live.
    Connected,
    /// Tearing the session down after a close request.
    Closing,
    /// The loop has ended.
    Closed,
}

impl ConnectionState {
    /// Returns `true` for `Closing` and `Closed`.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Rejection
// ============================================================================

/// Open failure that stops the loop instead of backing off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Rejection {
    /// The token was refused.
    Auth(String),
    /// The endpoint or transport can never work as configured.
    Config(String),
}

impl Rejection {
    /// Returns the rejection for `error`, if it is fatal to the loop.
    pub(crate) fn from_error(error: &Error) -> Option<Self> {
        match error {
            Error::Auth { message } => Some(Self::Auth(message.clone())),
            Error::Config { message } => Some(Self::Config(message.clone())),
            _ => None,
        }
    }

    /// Error handed to waiting callers.
    pub(crate) fn to_error(&self) -> Error {
        match self {
            Self::Auth(message) => Error::auth(message.clone()),
            Self::Config(message) => Error::config(message.clone()),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(message) | Self::Config(message) => f.write_str(message),
        }
    }
}

// ============================================================================
// Status
// ============================================================================

/// Snapshot written only by the connection loop and watched by callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Status {
    /// Loop generation that owns this status. Bumped on every loop start.
    pub(crate) epoch: u64,
    /// Current state.
    pub(crate) state: ConnectionState,
    /// Live session, set only while `Connected`.
    pub(crate) session: Option<SessionId>,
    /// Connect sequences that ran out of budget so far.
    pub(crate) exhaustions: u64,
    /// Why the loop stopped, when an open failure was fatal.
    pub(crate) rejection: Option<Rejection>,
}

impl Status {
    /// Status of a freshly started loop. Keeps the exhaustion count so
    /// waiters can still tell old exhaustions from new ones.
    pub(crate) fn starting(previous: &Status) -> Self {
        Self {
            epoch: previous.epoch + 1,
            state: ConnectionState::Connecting,
            session: None,
            exhaustions: previous.exhaustions,
            rejection: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
