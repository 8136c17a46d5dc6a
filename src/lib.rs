//! ESO Logs client - resilient GraphQL sessions.
//!
//! This library keeps one authenticated session to the ESO Logs v2 API open
//! and executes GraphQL requests over it, reconnecting and retrying when the
//! transport drops.
//!
//! # Architecture
//!
//! - **SessionManager**: background connection loop owning the live session
//! - **QueryExecutor**: runs one request, classifies failures, asks for
//!   reconnects
//! - **BackoffPolicy**: exponential delays with a cap and a budget
//! - **Transport**: GraphQL over HTTP POST, or over WebSocket
//!   (`graphql-transport-ws`)
//!
//! Key design principles:
//!
//! - Only the connection loop opens, stores or tears down a session
//! - Callers signal the loop through a command channel, never touch the session
//! - Connect timeouts are per caller; the loop keeps trying after one gives up
//! - GraphQL errors are returned untouched, never retried
//!
//! # Quick Start
//!
//! ```no_run
//! use esologs_client::{Client, EnvToken, Request, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder()
//!         .token_provider(EnvToken::default())
//!         .build()?;
//!
//!     let request = Request::new("query($code: String) { reportData { report(code: $code) { title } } }")
//!         .variable("code", "a1b2c3d4");
//!     let response = client.execute(&request).await?;
//!     println!("{:?}", response.data_at("/reportData/report/title"));
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`] and [`ClientBuilder`] |
//! | [`session`] | [`SessionManager`] and connection state |
//! | [`executor`] | [`QueryExecutor`] |
//! | [`backoff`] | [`BackoffPolicy`] and [`Budget`] |
//! | [`auth`] | Bearer token sources |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | GraphQL request/response and wire messages |
//! | [`transport`] | HTTP and WebSocket transports |

// ============================================================================
// Modules
// ============================================================================

/// Bearer token sources.
pub mod auth;

/// Retry delay schedules and budgets.
pub mod backoff;

/// Client entry point.
///
/// Use [`Client::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Request execution with reconnect and retry.
pub mod executor;

/// Type-safe identifiers.
pub mod identifiers;

/// GraphQL payloads and `graphql-transport-ws` messages.
pub mod protocol;

/// Session lifecycle.
pub mod session;

/// HTTP and WebSocket transports.
///
/// Defines the [`Connector`](transport::Connector) and
/// [`Session`](transport::Session) seams the session manager depends on.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Auth types
pub use auth::{EnvToken, StaticToken, TokenProvider};

// Backoff types
pub use backoff::{BackoffPolicy, BackoffState, Budget};

// Client types
pub use client::{Client, ClientBuilder};

// Error types
pub use error::{Error, ErrorClass, Result};

// Executor
pub use executor::QueryExecutor;

// Identifier types
pub use identifiers::{RequestId, SessionId};

// Protocol types
pub use protocol::{GraphQLError, Request, Response};

// Session types
pub use session::{ConnectionState, SessionManager, SessionOptions};

// Transport types
pub use transport::{Connector, HttpConnector, Session, WsConnector};
