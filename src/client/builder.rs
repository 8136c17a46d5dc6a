//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`Client`] instances.
//! The endpoint's scheme picks the transport: `http`/`https` speak GraphQL
//! over POST, `ws`/`wss` speak `graphql-transport-ws`.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use esologs_client::Client;
//!
//! # fn example() -> esologs_client::Result<()> {
//! let client = Client::builder()
//!     .token("eyJ0eXAiOiJKV1Qi...")
//!     .connect_timeout(Duration::from_secs(5))
//!     .max_attempts(5)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::auth::{StaticToken, TokenProvider};
use crate::backoff::{BackoffPolicy, Budget};
use crate::error::{Error, Result};
use crate::session::{DEFAULT_CLOSE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, SessionOptions};
use crate::transport::connection::DEFAULT_REQUEST_TIMEOUT;
use crate::transport::connector::DEFAULT_HANDSHAKE_TIMEOUT;
use crate::transport::{Connector, HttpConnector, WsConnector};

use super::core::Client;

// ============================================================================
// Constants
// ============================================================================

/// Public GraphQL client endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://www.esologs.com/api/v2/client";

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`] instance.
///
/// Use [`Client::builder()`] to create a new builder. Only a token source is
/// required; everything else has a default.
#[derive(Clone, Default)]
pub struct ClientBuilder {
    /// Endpoint URL, [`DEFAULT_ENDPOINT`] if unset.
    endpoint: Option<String>,
    /// Bearer token source.
    tokens: Option<Arc<dyn TokenProvider>>,
    /// Custom transport, replaces the connector picked from the endpoint.
    connector: Option<Arc<dyn Connector>>,
    connect_timeout: Option<Duration>,
    close_timeout: Option<Duration>,
    connect_budget: Option<Duration>,
    connect_backoff: Option<BackoffPolicy>,
    request_backoff: Option<BackoffPolicy>,
    max_attempts: Option<u32>,
    handshake_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("endpoint", &self.endpoint)
            .field("has_tokens", &self.tokens.is_some())
            .field("custom_connector", &self.connector.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a new builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the endpoint URL (`https://`, `http://`, `wss://` or `ws://`).
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Uses a fixed bearer token.
    #[inline]
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.tokens = Some(Arc::new(StaticToken::new(token)));
        self
    }

    /// Uses a token provider, asked on every transport open.
    #[inline]
    #[must_use]
    pub fn token_provider(mut self, provider: impl TokenProvider + 'static) -> Self {
        self.tokens = Some(Arc::new(provider));
        self
    }

    /// Replaces the transport picked from the endpoint.
    ///
    /// The endpoint, handshake timeout and request timeout are ignored when set.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// How long one `connect()` waits. Default 10s.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// How long `close()` waits for teardown. Default 10s.
    #[inline]
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = Some(timeout);
        self
    }

    /// Time a connect sequence may spend retrying before waiters are told it
    /// failed. Default 300s.
    #[inline]
    #[must_use]
    pub fn connect_budget(mut self, budget: Duration) -> Self {
        self.connect_budget = Some(budget);
        self
    }

    /// Replaces the connect backoff. `connect_budget`, if set, overrides its
    /// budget.
    #[inline]
    #[must_use]
    pub fn connect_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.connect_backoff = Some(policy);
        self
    }

    /// Replaces the per-request retry backoff. `max_attempts`, if set,
    /// overrides its budget.
    #[inline]
    #[must_use]
    pub fn request_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.request_backoff = Some(policy);
        self
    }

    /// Attempts per request, first try included. Default 3.
    #[inline]
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// How long opening a session may take: the WebSocket `connection_ack`,
    /// or the first HTTP round trip. Default 10s.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// How long one request waits for its response. Default 30s.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds the client with validation. Nothing is opened yet.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no token source is set
    /// - [`Error::Config`] if the endpoint is not an `http`/`https`/`ws`/`wss` URL
    /// - [`Error::Config`] if the endpoint needs TLS and the `rustls` feature
    ///   is off
    /// - [`Error::Config`] if a timeout is zero or `max_attempts` is 0
    pub fn build(self) -> Result<Client> {
        let tokens = self.validate_tokens()?;
        let options = self.session_options()?;
        let policy = self.request_policy()?;
        let connector = match &self.connector {
            Some(connector) => Arc::clone(connector),
            None => self.endpoint_connector()?,
        };

        Ok(Client::new(connector, tokens, options, policy))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    fn validate_tokens(&self) -> Result<Arc<dyn TokenProvider>> {
        self.tokens.clone().ok_or_else(|| {
            Error::config(
                "A bearer token is required. Use .token() or .token_provider() to set it.\n\
                 Example: Client::builder().token_provider(EnvToken::default())",
            )
        })
    }

    fn validate_endpoint(&self) -> Result<Url> {
        let raw = self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);

        let url = Url::parse(raw)
            .map_err(|e| Error::config(format!("Invalid endpoint '{raw}': {e}")))?;

        match url.scheme() {
            "https" | "wss" if !cfg!(feature = "rustls") => Err(Error::config(format!(
                "Endpoint '{raw}' needs TLS. Enable the `rustls` feature or use http:// or ws://"
            ))),
            "http" | "https" | "ws" | "wss" => Ok(url),
            scheme => Err(Error::config(format!(
                "Endpoint must use https://, http://, wss:// or ws://, got '{scheme}://'"
            ))),
        }
    }

    fn session_options(&self) -> Result<SessionOptions> {
        let connect_timeout = non_zero(
            "connect_timeout",
            self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        )?;
        let close_timeout = non_zero(
            "close_timeout",
            self.close_timeout.unwrap_or(DEFAULT_CLOSE_TIMEOUT),
        )?;

        let mut connect_backoff = self
            .connect_backoff
            .clone()
            .unwrap_or_else(BackoffPolicy::connection);
        if let Some(budget) = self.connect_budget {
            let budget = non_zero("connect_budget", budget)?;
            connect_backoff = connect_backoff.with_budget(Budget::Elapsed(budget));
        }

        Ok(SessionOptions {
            connect_timeout,
            close_timeout,
            connect_backoff,
        })
    }

    fn request_policy(&self) -> Result<BackoffPolicy> {
        let policy = self
            .request_backoff
            .clone()
            .unwrap_or_else(BackoffPolicy::request);

        match self.max_attempts {
            Some(0) => Err(Error::config("max_attempts must be at least 1")),
            Some(attempts) => Ok(policy.with_budget(Budget::Attempts(attempts))),
            None => Ok(policy),
        }
    }

    fn endpoint_connector(&self) -> Result<Arc<dyn Connector>> {
        let endpoint = self.validate_endpoint()?;
        let handshake_timeout = non_zero(
            "handshake_timeout",
            self.handshake_timeout.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
        )?;
        let request_timeout = non_zero(
            "request_timeout",
            self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        )?;

        let connector: Arc<dyn Connector> = match endpoint.scheme() {
            "ws" | "wss" => Arc::new(
                WsConnector::new(endpoint)
                    .handshake_timeout(handshake_timeout)
                    .request_timeout(request_timeout),
            ),
            _ => Arc::new(
                HttpConnector::new(endpoint)
                    .handshake_timeout(handshake_timeout)
                    .request_timeout(request_timeout),
            ),
        };

        Ok(connector)
    }
}

fn non_zero(name: &str, value: Duration) -> Result<Duration> {
    if value.is_zero() {
        return Err(Error::config(format!("{name} must be greater than zero")));
    }
    Ok(value)
}

// ============================================================================
// Tests
// ============================================================================
