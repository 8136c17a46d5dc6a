//! GraphQL over HTTP POST.
//!
//! Each session owns its own `reqwest` client (and so its own connection
//! pool). Opening a session sends `{ __typename }` with the bearer token,
//! which proves both reachability and the token before the session is handed
//! to the manager. Reconnecting replaces the pool.
//!
//! # Status Mapping
//!
//! | Outcome | Error |
//! |---------|-------|
//! | HTTP 401 / 403 | [`Error::Auth`] |
//! | Body carries GraphQL `errors` | [`Error::Query`] |
//! | Connection lost or refused mid-request | [`Error::TransportClosed`] |
//! | No answer within the request timeout | [`Error::RequestTimeout`] |
//! | Any other non-success status | [`Error::Unknown`] |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Request, Response};

use super::connection::DEFAULT_REQUEST_TIMEOUT;
use super::connector::DEFAULT_HANDSHAKE_TIMEOUT;
use super::{Connector, Session};

// ============================================================================
// Constants
// ============================================================================

/// Query sent when opening a session.
const OPEN_QUERY: &str = "{ __typename }";

// ============================================================================
// HttpConnector
// ============================================================================

/// Opens HTTP sessions to one GraphQL endpoint.
///
/// # Example
///
/// ```ignore
/// let connector = HttpConnector::new(Url::parse("https://www.esologs.com/api/v2/client")?);
/// let session = connector.open(&token).await?;
/// ```
#[derive(Debug, Clone)]
pub struct HttpConnector {
    endpoint: Url,
    handshake_timeout: Duration,
    request_timeout: Duration,
}

impl HttpConnector {
    /// Creates a connector with default timeouts.
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the timeout for the opening request, TCP and TLS included.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Sets the per-request timeout of opened sessions.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Returns the endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn open(&self, token: &str) -> Result<Box<dyn Session>> {
        if token.is_empty() {
            return Err(Error::auth("Empty bearer token"));
        }

        if !matches!(self.endpoint.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "Unsupported scheme for HTTP transport: {}",
                self.endpoint.scheme()
            )));
        }

        let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::auth("Token contains characters not allowed in a header"))?;
        bearer.set_sensitive(true);

        let client = reqwest::Client::builder()
            .connect_timeout(self.handshake_timeout)
            .build()
            .map_err(|e| Error::config(format!("Cannot build HTTP client: {e}")))?;

        let session = HttpSession {
            client,
            endpoint: self.endpoint.clone(),
            bearer,
            request_timeout: self.request_timeout,
            closed: watch::Sender::new(false),
        };

        let timeout_ms = self.handshake_timeout.as_millis() as u64;
        let check = Request::new(OPEN_QUERY);

        match timeout(self.handshake_timeout, session.post(&check)).await {
            Ok(Ok(_)) => {}
            Ok(Err(error @ (Error::Auth { .. } | Error::Config { .. }))) => return Err(error),
            Ok(Err(error)) => {
                return Err(Error::connection(format!("Opening request failed: {error}")));
            }
            Err(_) => {
                return Err(Error::connection(format!(
                    "No answer to opening request within {timeout_ms}ms"
                )));
            }
        }

        info!(endpoint = %self.endpoint, "HTTP session verified");

        Ok(Box::new(session))
    }
}

// ============================================================================
// HttpSession
// ============================================================================

/// One verified HTTP session.
struct HttpSession {
    client: reqwest::Client,
    endpoint: Url,
    bearer: HeaderValue,
    request_timeout: Duration,
    closed: watch::Sender<bool>,
}

impl HttpSession {
    /// Posts one request and maps the answer.
    async fn post(&self, request: &Request) -> Result<Response> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, self.bearer.clone())
            .json(request)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::auth(format!("Request rejected with HTTP {status}")));
        }

        let body = response.bytes().await.map_err(classify_send_error)?;
        trace!(%status, bytes = body.len(), "HTTP response received");

        match serde_json::from_slice::<Response>(&body) {
            Ok(response) if response.has_errors() => Err(Error::query(response.errors)),
            Ok(response) if status.is_success() => Ok(response),
            Ok(_) => Err(Error::unknown(format!("HTTP {status}"))),
            Err(_) if !status.is_success() => Err(Error::unknown(format!("HTTP {status}"))),
            Err(e) => Err(Error::protocol(format!("Invalid response body: {e}"))),
        }
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn execute(&self, request: &Request) -> Result<Response> {
        let mut closed = self.closed.subscribe();

        tokio::select! {
            biased;

            _ = closed.wait_for(|closed| *closed) => {
                debug!("HTTP session closed with request in flight");
                Err(Error::TransportClosed)
            }

            result = timeout(self.request_timeout, self.post(request)) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::request_timeout(
                    RequestId::generate(),
                    self.request_timeout.as_millis() as u64,
                )),
            },
        }
    }

    async fn close(&self) {
        if !self.closed.send_replace(true) {
            debug!(endpoint = %self.endpoint, "HTTP session closed");
        }
    }
}

/// Maps `reqwest` failures. Anything that lost the connection is transient.
fn classify_send_error(error: reqwest::Error) -> Error {
    if error.is_builder() {
        return Error::config(format!("Invalid HTTP request: {error}"));
    }
    if error.is_decode() {
        return Error::protocol(error.to_string());
    }

    debug!(error = %error, "HTTP transport failure");
    Error::TransportClosed
}

// ============================================================================
// Tests
// ============================================================================
