//! `graphql-transport-ws` message types.
//!
//! Every frame is a JSON text message tagged by `type`.
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `connection_init` | Client → Server | Open handshake, carries auth |
//! | `connection_ack` | Server → Client | Handshake accepted |
//! | `ping` / `pong` | Both | Keepalive |
//! | `subscribe` | Client → Server | Start an operation |
//! | `next` | Server → Client | Operation result |
//! | `error` | Server → Client | Operation rejected |
//! | `complete` | Both | Operation finished |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::RequestId;

use super::{GraphQLError, Request, Response};

// ============================================================================
// Constants
// ============================================================================

/// WebSocket subprotocol negotiated with the service.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

// ============================================================================
// ClientMessage
// ============================================================================

/// Messages sent to the service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the protocol session.
    ConnectionInit {
        /// Connection parameters (bearer token).
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Keepalive check.
    Ping,
    /// Keepalive answer.
    Pong,
    /// Starts an operation.
    Subscribe {
        /// Correlation ID.
        id: RequestId,
        /// The operation.
        payload: Request,
    },
    /// Stops an operation.
    Complete {
        /// Correlation ID.
        id: RequestId,
    },
}

// ============================================================================
// ServerMessage
// ============================================================================

/// Messages received from the service.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted.
    ConnectionAck {
        /// Optional server parameters.
        #[serde(default)]
        payload: Option<Value>,
    },
    /// Keepalive check.
    Ping {
        /// Optional payload.
        #[serde(default)]
        payload: Option<Value>,
    },
    /// Keepalive answer.
    Pong {
        /// Optional payload.
        #[serde(default)]
        payload: Option<Value>,
    },
    /// Operation result.
    Next {
        /// Correlation ID.
        id: RequestId,
        /// Execution result.
        payload: Response,
    },
    /// Operation rejected before execution.
    Error {
        /// Correlation ID.
        id: RequestId,
        /// Validation errors.
        payload: Vec<GraphQLError>,
    },
    /// Operation finished.
    Complete {
        /// Correlation ID.
        id: RequestId,
    },
}

impl ServerMessage {
    /// Returns the correlation ID, if the message belongs to an operation.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Self::Next { id, .. } | Self::Error { id, .. } | Self::Complete { id } => Some(*id),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
