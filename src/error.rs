//! Error types for the ESO Logs client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use esologs_client::{Client, Request, Result};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     let response = client.execute(&Request::new("{ rateLimitData { pointsSpentThisHour } }")).await?;
//!     println!("{:?}", response.data);
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | [`ErrorClass`] |
//! |----------|----------|----------------|
//! | Configuration | [`Error::Config`] | Fatal |
//! | Authentication | [`Error::Auth`] | Fatal |
//! | Connection | [`Error::ConnectTimeout`], [`Error::SessionClosed`] | Fatal |
//! | Transport | [`Error::TransportClosed`] | Transient |
//! | Query | [`Error::Query`] | Query |
//! | Retry | [`Error::RetriesExhausted`] | Fatal |
//! | Other | [`Error::Connection`], [`Error::Protocol`], [`Error::RequestTimeout`], [`Error::Unknown`], external | Unknown |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;
use crate::protocol::GraphQLError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// ErrorClass
// ============================================================================

/// How the query executor treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The session went away. Reconnect and retry.
    Transient,
    /// The service rejected the request itself. Return it untouched.
    Query,
    /// Retrying cannot help. Surface immediately.
    Fatal,
    /// Not classified. Retry with the transient budget, then surface verbatim.
    Unknown,
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Authentication Errors
    // ========================================================================
    /// Bearer token rejected while opening the transport.
    #[error("Authentication failed: {message}")]
    Auth {
        /// Reason given by the service or the token provider.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport open failed.
    ///
    /// Retried by the connection loop; never seen by `connect()` callers.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// No session within the caller's wait budget.
    ///
    /// The background connection loop keeps retrying.
    #[error("Connect timeout after {timeout_ms}ms")]
    ConnectTimeout {
        /// Milliseconds waited before giving up.
        timeout_ms: u64,
    },

    /// The session disappeared while a request was in flight.
    #[error("Transport closed")]
    TransportClosed,

    /// The session manager was closed.
    #[error("Session closed")]
    SessionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// The service accepted the connection but rejected the request.
    #[error("Query error: {message}")]
    Query {
        /// First error message, for display.
        message: String,
        /// Every error the service reported.
        errors: Vec<GraphQLError>,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// No response within the request timeout.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Transient failures outlasted the request's attempt budget.
    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// The last failure observed.
        source: Box<Error>,
    },

    /// Unclassified failure reported by a transport.
    #[error("Unknown error: {message}")]
    Unknown {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    #[inline]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connect timeout error.
    #[inline]
    pub fn connect_timeout(timeout_ms: u64) -> Self {
        Self::ConnectTimeout { timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a query error from the service's error list.
    pub fn query(errors: Vec<GraphQLError>) -> Self {
        let message = errors
            .first()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "query rejected".to_string());

        Self::Query { message, errors }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a retries exhausted error.
    #[inline]
    pub fn retries_exhausted(attempts: u32, last: Error) -> Self {
        Self::RetriesExhausted {
            attempts,
            source: Box::new(last),
        }
    }

    /// Creates an unknown error.
    #[inline]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns how the executor should treat this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::TransportClosed => ErrorClass::Transient,
            Self::Query { .. } => ErrorClass::Query,
            Self::Config { .. }
            | Self::Auth { .. }
            | Self::ConnectTimeout { .. }
            | Self::SessionClosed
            | Self::RetriesExhausted { .. } => ErrorClass::Fatal,
            Self::Connection { .. }
            | Self::Protocol { .. }
            | Self::RequestTimeout { .. }
            | Self::Unknown { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::WebSocket(_)
            | Self::ChannelClosed(_) => ErrorClass::Unknown,
        }
    }

    /// Returns `true` if the executor retries this error.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient | ErrorClass::Unknown)
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection-layer error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectTimeout { .. }
                | Self::TransportClosed
                | Self::SessionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this is an authentication error.
    #[inline]
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
