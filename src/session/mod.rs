//! Session lifecycle.
//!
//! A [`SessionManager`] keeps at most one live session to the API and
//! replaces it when the executor reports the transport gone.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SessionManager`] | Connect, close, reconnect |
//! | [`ConnectionState`] | Published lifecycle state |
//! | [`SessionOptions`] | Timeouts and connect backoff |

// ============================================================================
// Submodules
// ============================================================================

/// Session manager and its connection loop.
pub mod manager;

/// Manager timeouts and connect backoff.
pub mod options;

/// Published connection state.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use manager::SessionManager;
pub use options::{DEFAULT_CLOSE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, SessionOptions};
pub use state::ConnectionState;
