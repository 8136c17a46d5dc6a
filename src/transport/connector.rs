//! WebSocket dialing and protocol handshake.
//!
//! # Connection Flow
//!
//! 1. Dial the endpoint with `Authorization: Bearer …` and the
//!    `graphql-transport-ws` subprotocol
//! 2. Send `connection_init` carrying the same bearer token
//! 3. Wait for `connection_ack` (answering pings meanwhile)
//! 4. Hand the socket to [`Connection`], which runs the event loop
//!
//! HTTP 401/403 on upgrade, or close codes 4401/4403 during the handshake,
//! are reported as [`Error::Auth`]. A URL the client cannot dial at all (for
//! example `wss://` without TLS compiled in) is [`Error::Config`]. Both stop
//! the connection loop. Everything else is a plain connection failure the
//! session manager will retry.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{from_str, json, to_string};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::error::UrlError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tracing::{debug, info, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, SUBPROTOCOL, ServerMessage};

use super::connection::{Connection, DEFAULT_REQUEST_TIMEOUT, WsStream};
use super::{Connector, Session};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for dialing plus `connection_ack`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Close code for a rejected `connection_init` (unauthorized).
const CLOSE_UNAUTHORIZED: u16 = 4401;

/// Close code for a rejected `connection_init` (forbidden).
const CLOSE_FORBIDDEN: u16 = 4403;

// ============================================================================
// WsConnector
// ============================================================================

/// Opens `graphql-transport-ws` sessions to one endpoint.
///
/// # Example
///
/// ```ignore
/// let connector = WsConnector::new(Url::parse("wss://www.esologs.com/api/v2/client")?);
/// let session = connector.open(&token).await?;
/// ```
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: Url,
    handshake_timeout: Duration,
    request_timeout: Duration,
}

impl WsConnector {
    /// Creates a connector with default timeouts.
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the dial + acknowledgement timeout.
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

    /// Dials the endpoint and completes the WebSocket upgrade.
    async fn dial(&self, token: &str) -> Result<WsStream> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(classify_dial_error)?;

        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::auth("Token contains characters not allowed in a header"))?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

        let (ws_stream, response) = connect_async(request).await.map_err(classify_dial_error)?;
        debug!(status = %response.status(), endpoint = %self.endpoint, "WebSocket upgraded");

        Ok(ws_stream)
    }

    /// Sends `connection_init` and waits for `connection_ack`.
    async fn handshake(ws_stream: &mut WsStream, token: &str) -> Result<()> {
        let init = ClientMessage::ConnectionInit {
            payload: Some(json!({ "Authorization": format!("Bearer {token}") })),
        };
        ws_stream.send(Message::Text(to_string(&init)?.into())).await?;

        while let Some(message) = ws_stream.next().await {
            match message? {
                Message::Text(text) => match from_str::<ServerMessage>(&text) {
                    Ok(ServerMessage::ConnectionAck { .. }) => return Ok(()),
                    Ok(ServerMessage::Ping { .. }) => {
                        let pong = to_string(&ClientMessage::Pong)?;
                        ws_stream.send(Message::Text(pong.into())).await?;
                    }
                    Ok(other) => trace!(?other, "Ignoring message before connection_ack"),
                    Err(e) => {
                        return Err(Error::protocol(format!(
                            "Invalid handshake message: {e}"
                        )));
                    }
                },

                Message::Close(Some(frame)) => {
                    let code = u16::from(frame.code);
                    let reason = frame.reason.as_str().to_owned();
                    return Err(match code {
                        CLOSE_UNAUTHORIZED | CLOSE_FORBIDDEN => Error::auth(reason),
                        _ => Error::connection(format!(
                            "Closed during handshake ({code}): {reason}"
                        )),
                    });
                }

                Message::Close(None) => {
                    return Err(Error::connection("Closed during handshake"));
                }

                // Ignore Binary, Ping, Pong
                _ => {}
            }
        }

        Err(Error::connection("Stream ended before connection_ack"))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, token: &str) -> Result<Box<dyn Session>> {
        if token.is_empty() {
            return Err(Error::auth("Empty bearer token"));
        }

        let timeout_ms = self.handshake_timeout.as_millis() as u64;

        let mut ws_stream = timeout(self.handshake_timeout, self.dial(token))
            .await
            .map_err(|_| Error::connection(format!("Dial timed out after {timeout_ms}ms")))??;

        timeout(
            self.handshake_timeout,
            Self::handshake(&mut ws_stream, token),
        )
        .await
        .map_err(|_| {
            Error::connection(format!("No connection_ack within {timeout_ms}ms"))
        })??;

        info!(endpoint = %self.endpoint, "Session acknowledged");

        Ok(Box::new(Connection::new(ws_stream, self.request_timeout)))
    }
}

/// Maps upgrade failures, singling out rejected credentials and unusable URLs.
fn classify_dial_error(error: WsError) -> Error {
    match &error {
        WsError::Http(response) => {
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Error::auth(format!("Upgrade rejected with HTTP {status}"));
            }
        }
        WsError::Url(UrlError::UnableToConnect(_)) => {}
        WsError::Url(e) => return Error::config(format!("Unusable endpoint: {e}")),
        _ => {}
    }

    Error::connection(error.to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;

    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{
        ErrorResponse, Request as HsRequest, Response as HsResponse,
    };
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    use crate::protocol::Request;
    use crate::transport::stub::init_tracing;

    /// What the test server does after the upgrade.
    #[derive(Clone, Copy)]
    enum Script {
        /// Ack, then answer every subscribe with `next` echoing the variables.
        Echo,
        /// Ack, then answer every subscribe with `error`.
        Reject,
        /// Close with 4403 instead of acking.
        Forbid,
        /// Ack, then drop the socket on the first subscribe.
        HangUp,
    }

    /// Serves one connection on a random local port.
    async fn serve(script: Script) -> Url {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr: SocketAddr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let callback = |request: &HsRequest, mut response: HsResponse| -> std::result::Result<HsResponse, ErrorResponse> {
                assert!(request.headers().contains_key(AUTHORIZATION));
                response
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
                Ok(response)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .expect("upgrade");

            // connection_init
            let init = ws.next().await.expect("init").expect("frame");
            let init: serde_json::Value =
                serde_json::from_str(init.to_text().expect("text")).expect("json");
            assert_eq!(init["type"], "connection_init");
            assert_eq!(init["payload"]["Authorization"], "Bearer secret");

            if let Script::Forbid = script {
                let frame = CloseFrame {
                    code: CloseCode::from(CLOSE_FORBIDDEN),
                    reason: "Forbidden".into(),
                };
                let _ = ws.send(Message::Close(Some(frame))).await;
                return;
            }

            ws.send(Message::Text(r#"{"type":"connection_ack"}"#.into()))
                .await
                .expect("ack");

            while let Some(Ok(message)) = ws.next().await {
                let Message::Text(text) = message else { continue };
                let value: serde_json::Value = serde_json::from_str(&text).expect("json");
                if value["type"] != "subscribe" {
                    continue;
                }
                let id = value["id"].clone();

                let reply = match script {
                    Script::Echo => json!({
                        "type": "next",
                        "id": id,
                        "payload": { "data": { "echo": value["payload"]["variables"] } }
                    }),
                    Script::Reject => json!({
                        "type": "error",
                        "id": id,
                        "payload": [{ "message": "Cannot query field \"fightz\"" }]
                    }),
                    Script::HangUp | Script::Forbid => return,
                };

                ws.send(Message::Text(reply.to_string().into())).await.expect("reply");
                ws.send(Message::Text(json!({ "type": "complete", "id": id }).to_string().into()))
                    .await
                    .expect("complete");
            }
        });

        Url::parse(&format!("ws://{addr}/api/v2/client")).expect("url")
    }

    #[tokio::test]
    async fn test_open_and_execute() {
        let connector = WsConnector::new(serve(Script::Echo).await);
        let session = connector.open("secret").await.expect("open");

        let request = Request::new("query($code: String) { report(code: $code) { title } }")
            .variable("code", "aBcD");
        let response = session.execute(&request).await.expect("execute");
        assert_eq!(response.data_at("/echo/code"), Some(&json!("aBcD")));

        session.close().await;
    }

    #[tokio::test]
    async fn test_query_error_is_returned() {
        let connector = WsConnector::new(serve(Script::Reject).await);
        let session = connector.open("secret").await.expect("open");

        let err = session
            .execute(&Request::new("{ fightz }"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Query { .. }));

        session.close().await;
    }

    #[tokio::test]
    async fn test_forbidden_init_is_auth_error() {
        let connector = WsConnector::new(serve(Script::Forbid).await);
        let err = connector.open("secret").await.err().expect("rejected");
        assert!(err.is_auth_error(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_hang_up_is_transport_closed() {
        let connector = WsConnector::new(serve(Script::HangUp).await);
        let session = connector.open("secret").await.expect("open");

        let err = session
            .execute(&Request::new("{ __typename }"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransportClosed), "got {err:?}");
    }

    #[tokio::test]
    async fn test_closed_session_rejects_requests() {
        let connector = WsConnector::new(serve(Script::Echo).await);
        let session = connector.open("secret").await.expect("open");
        session.close().await;

        let err = session
            .execute(&Request::new("{ __typename }"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransportClosed));
    }

    #[tokio::test]
    async fn test_empty_token_is_auth_error() {
        let connector = WsConnector::new(Url::parse("ws://127.0.0.1:9/").expect("url"));
        let err = connector.open("").await.err().expect("rejected");
        assert!(err.is_auth_error());
    }

    #[test]
    fn test_tls_not_enabled_is_config_error() {
        let err = classify_dial_error(WsError::Url(UrlError::TlsFeatureNotEnabled));
        assert!(matches!(err, Error::Config { .. }), "got {err:?}");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unreachable_url_stays_retryable() {
        let err = classify_dial_error(WsError::Url(UrlError::UnableToConnect(
            "ws://127.0.0.1:9/".into(),
        )));
        assert!(matches!(err, Error::Connection { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_config_error() {
        let connector = WsConnector::new(Url::parse("ftp://127.0.0.1:9/").expect("url"));
        let err = connector.open("secret").await.err().expect("rejected");
        assert!(matches!(err, Error::Config { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_refused_dial_is_connection_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let connector = WsConnector::new(Url::parse(&format!("ws://{addr}/")).expect("url"))
            .handshake_timeout(Duration::from_secs(2));
        let err = connector.open("secret").await.err().expect("refused");
        assert!(!err.is_auth_error());
        assert!(err.is_retryable());
    }
}
