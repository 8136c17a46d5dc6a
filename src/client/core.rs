//! API client.
//!
//! The [`Client`] ties a [`SessionManager`] to a [`QueryExecutor`]. Clones
//! share the same session.
//!
//! # Example
//!
//! ```no_run
//! use esologs_client::{Client, EnvToken, Request};
//!
//! # async fn example() -> esologs_client::Result<()> {
//! let client = Client::builder()
//!     .token_provider(EnvToken::default())
//!     .build()?;
//!
//! let response = client
//!     .execute(&Request::new("{ worldData { zones { id name } } }"))
//!     .await?;
//! println!("{:?}", response.data);
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::auth::TokenProvider;
use crate::backoff::BackoffPolicy;
use crate::error::Result;
use crate::executor::QueryExecutor;
use crate::identifiers::SessionId;
use crate::protocol::{Request, Response};
use crate::session::{ConnectionState, SessionManager, SessionOptions};
use crate::transport::Connector;

use super::builder::ClientBuilder;

// ============================================================================
// Client
// ============================================================================

/// Client for the ESO Logs GraphQL API.
///
/// Reconnects transparently: callers see either a response or an error that
/// retrying would not fix.
#[derive(Clone)]
pub struct Client {
    manager: Arc<SessionManager>,
    executor: Arc<QueryExecutor>,
}

// ============================================================================
// Client - Display
// ============================================================================

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("session", &self.session_id())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client - Public API
// ============================================================================

impl Client {
    /// Creates a configuration builder for the client.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
        options: SessionOptions,
        policy: BackoffPolicy,
    ) -> Self {
        let manager = Arc::new(SessionManager::new(connector, tokens, options));
        let executor = Arc::new(QueryExecutor::new(Arc::clone(&manager), policy));

        Self { manager, executor }
    }

    /// Opens the session if needed. Optional; `execute` connects on demand.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::connect`].
    pub async fn connect(&self) -> Result<()> {
        self.manager.connect().await
    }

    /// Closes the session. The client can be reconnected afterwards.
    pub async fn close(&self) {
        self.manager.close().await;
    }

    /// Executes a GraphQL request.
    ///
    /// # Errors
    ///
    /// See [`QueryExecutor::execute`].
    pub async fn execute(&self, request: &Request) -> Result<Response> {
        self.executor.execute(request).await
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Returns the live session's ID, if connected.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.manager.session_id()
    }

    /// Returns the underlying session manager.
    #[inline]
    #[must_use]
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }
}

// ============================================================================
// Tests
// ============================================================================
