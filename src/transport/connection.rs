//! WebSocket connection and event loop.
//!
//! This module handles one `graphql-transport-ws` connection to the API,
//! including request/result correlation and keepalive.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming frames from the service (`next`, `error`, `complete`, `ping`)
//! - Outgoing operations from the session manager
//! - Request/result correlation by UUID
//! - Failing every pending request when the socket goes away

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{from_str, to_string};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{ClientMessage, Request, Response, ServerMessage};

use super::Session;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for one operation.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pending requests before rejecting new ones.
const MAX_PENDING_REQUESTS: usize = 100;

/// How long `close` waits for the event loop to finish.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

/// Client side of the socket.
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Map of request IDs to result channels.
type CorrelationMap = FxHashMap<RequestId, oneshot::Sender<Result<Response>>>;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Subscribe and wait for the result.
    Send {
        id: RequestId,
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
    },
    /// Forget a timed-out operation and tell the service.
    Cancel(RequestId),
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// An acknowledged `graphql-transport-ws` connection.
///
/// Created by [`WsConnector`](super::WsConnector) after the handshake.
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Event loop task, taken by `close`.
    task: Mutex<Option<JoinHandle<()>>>,
    /// Per-operation timeout.
    request_timeout: Duration,
}

impl Connection {
    /// Wraps an acknowledged socket and spawns the event loop.
    pub(crate) fn new(ws_stream: WsStream, request_timeout: Duration) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));

        let task = tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&correlation),
        ));

        Self {
            command_tx,
            correlation,
            task: Mutex::new(Some(task)),
            request_timeout,
        }
    }

    /// Sends a request and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`Error::TransportClosed`] if the connection is gone
    /// - [`Error::Query`] if the service rejected the operation
    /// - [`Error::RequestTimeout`] if no result arrived within the timeout
    /// - [`Error::Protocol`] if too many requests are pending
    pub async fn send(&self, request: Request) -> Result<Response> {
        let id = RequestId::generate();

        {
            let correlation = self.correlation.lock();
            if correlation.len() >= MAX_PENDING_REQUESTS {
                warn!(
                    pending = correlation.len(),
                    max = MAX_PENDING_REQUESTS,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    correlation.len(),
                    MAX_PENDING_REQUESTS
                )));
            }
        }

        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Send {
                id,
                request,
                response_tx,
            })
            .map_err(|_| Error::TransportClosed)?;

        match timeout(self.request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::TransportClosed),
            Err(_) => {
                let _ = self.command_tx.send(ConnectionCommand::Cancel(id));

                Err(Error::request_timeout(
                    id,
                    self.request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Returns `true` once the event loop has stopped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop(
        ws_stream: WsStream,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let reply = Self::handle_incoming_message(&text, &correlation);

                            if let Some(reply) = reply
                                && let Err(e) = Self::write(&mut ws_write, &reply).await
                            {
                                warn!(error = %e, "Failed to send reply");
                            }
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { id, request, response_tx }) => {
                            Self::handle_send_command(
                                id,
                                request,
                                response_tx,
                                &mut ws_write,
                                &correlation,
                            ).await;
                        }

                        Some(ConnectionCommand::Cancel(id)) => {
                            correlation.lock().remove(&id);
                            let _ = Self::write(&mut ws_write, &ClientMessage::Complete { id }).await;
                            debug!(%id, "Cancelled timed-out operation");
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        // Stop accepting commands before failing what is left
        command_rx.close();
        Self::fail_pending_requests(&correlation);

        debug!("Event loop terminated");
    }

    /// Handles an incoming text frame. Returns a frame to send back, if any.
    fn handle_incoming_message(
        text: &str,
        correlation: &Arc<Mutex<CorrelationMap>>,
    ) -> Option<ClientMessage> {
        let message = match from_str::<ServerMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, text = %text, "Failed to parse incoming message");
                return None;
            }
        };

        match message {
            ServerMessage::Next { id, payload } => {
                let result = if payload.has_errors() {
                    Err(Error::query(payload.errors))
                } else {
                    Ok(payload)
                };
                Self::resolve(correlation, id, result);
                None
            }

            ServerMessage::Error { id, payload } => {
                Self::resolve(correlation, id, Err(Error::query(payload)));
                None
            }

            ServerMessage::Complete { id } => {
                // Normal after `next`; only a bare `complete` leaves a waiter behind
                if let Some(tx) = correlation.lock().remove(&id) {
                    let _ = tx.send(Err(Error::protocol(
                        "Operation completed without a result",
                    )));
                }
                None
            }

            ServerMessage::Ping { .. } => Some(ClientMessage::Pong),

            ServerMessage::Pong { .. } => {
                trace!("Pong received");
                None
            }

            ServerMessage::ConnectionAck { .. } => {
                warn!("Unexpected connection_ack after handshake");
                None
            }
        }
    }

    /// Delivers a result to its waiter.
    fn resolve(correlation: &Arc<Mutex<CorrelationMap>>, id: RequestId, result: Result<Response>) {
        let tx = correlation.lock().remove(&id);

        if let Some(tx) = tx {
            let _ = tx.send(result);
        } else {
            warn!(%id, "Result for unknown request");
        }
    }

    /// Handles a send command from the session manager.
    async fn handle_send_command(
        id: RequestId,
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
        ws_write: &mut SplitSink<WsStream, Message>,
        correlation: &Arc<Mutex<CorrelationMap>>,
    ) {
        // Store correlation before sending
        correlation.lock().insert(id, response_tx);

        let message = ClientMessage::Subscribe {
            id,
            payload: request,
        };

        if let Err(e) = Self::write(ws_write, &message).await {
            if let Some(tx) = correlation.lock().remove(&id) {
                let error = match e {
                    Error::Json(_) => e,
                    _ => Error::TransportClosed,
                };
                let _ = tx.send(Err(error));
            }
            return;
        }

        trace!(%id, "Request sent");
    }

    /// Serializes and writes one frame.
    async fn write(
        ws_write: &mut SplitSink<WsStream, Message>,
        message: &ClientMessage,
    ) -> Result<()> {
        let json = to_string(message)?;
        ws_write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Fails all pending requests with `TransportClosed`.
    fn fail_pending_requests(correlation: &Arc<Mutex<CorrelationMap>>) {
        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::TransportClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
    }
}

#[async_trait]
impl Session for Connection {
    async fn execute(&self, request: &Request) -> Result<Response> {
        self.send(request.clone()).await
    }

    async fn close(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);

        let task = self.task.lock().take();
        if let Some(mut task) = task
            && timeout(CLOSE_TIMEOUT, &mut task).await.is_err()
        {
            warn!("Event loop did not stop in time, aborting");
            task.abort();
            Self::fail_pending_requests(&self.correlation);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The session manager always calls `close`; this only covers sessions
        // dropped without it.
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }
}

// ============================================================================
// Tests
// ============================================================================
