//! GraphQL protocol message types.
//!
//! This module defines the payloads exchanged with the ESO Logs API.
//!
//! # Protocol Overview
//!
//! | Type | Direction | Purpose |
//! |------|-----------|---------|
//! | `Request` | Local → Remote | GraphQL operation |
//! | `Response` | Remote → Local | Execution result |
//! | `ClientMessage` | Local → Remote | `graphql-transport-ws` frame |
//! | `ServerMessage` | Remote → Local | `graphql-transport-ws` frame |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | WebSocket framing of operations |
//! | `request` | Request and Response types |

// ============================================================================
// Submodules
// ============================================================================

/// `graphql-transport-ws` frames.
pub mod message;

/// Request and Response types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{ClientMessage, SUBPROTOCOL, ServerMessage};
pub use request::{GraphQLError, Location, Request, Response};
