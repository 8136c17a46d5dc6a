//! Transport layer.
//!
//! The session manager never speaks the wire protocol itself. It opens
//! sessions through a [`Connector`] and sends requests over the returned
//! [`Session`]. Two connectors ship: [`HttpConnector`] (GraphQL over POST,
//! the default for `https://` endpoints) and [`WsConnector`]
//! (`graphql-transport-ws`, for `wss://`).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                              ┌─────────────────┐
//! │  SessionManager  │   HTTP POST                  │  ESO Logs API   │
//! │  HttpConnector   │─────────────────────────────►│                 │
//! │                  │   graphql-transport-ws       │  /api/v2/client │
//! │  WsConnector     │─────────────────────────────►│                 │
//! │  → Connection    │◄─────────────────────────────│                 │
//! └──────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `WsConnector::open` - Dial, send `connection_init`, wait for `connection_ack`
//! 2. `Connection::execute` - `subscribe`, wait for `next` / `error`
//! 3. `Connection::close` - Close the socket, fail in-flight requests
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket connection and event loop |
//! | `connector` | Dialing and handshake |
//! | `http` | GraphQL over HTTP POST |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{Request, Response};

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub mod connection;

/// WebSocket dialing and protocol handshake.
pub mod connector;

/// GraphQL over HTTP POST.
pub mod http;

#[cfg(test)]
pub(crate) mod stub;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::Connection;
pub use connector::WsConnector;
pub use http::HttpConnector;

// ============================================================================
// Traits
// ============================================================================

/// Opens sessions to the remote service.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new session authenticated with `token`.
    ///
    /// # Errors
    ///
    /// - [`Error::Auth`](crate::Error::Auth) if the token is rejected (never retried)
    /// - [`Error::Config`](crate::Error::Config) if the endpoint can never be
    ///   opened, e.g. TLS is not compiled in (never retried)
    /// - any other error is treated as a transient open failure
    async fn open(&self, token: &str) -> Result<Box<dyn Session>>;
}

/// One established connection.
///
/// Owned by the session manager; callers never hold one directly.
#[async_trait]
pub trait Session: Send + Sync {
    /// Sends a request and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`Error::TransportClosed`](crate::Error::TransportClosed) if the session went away
    /// - [`Error::Query`](crate::Error::Query) if the service rejected the request
    async fn execute(&self, request: &Request) -> Result<Response>;

    /// Tears the session down. In-flight requests fail with
    /// [`Error::TransportClosed`](crate::Error::TransportClosed).
    async fn close(&self);
}
