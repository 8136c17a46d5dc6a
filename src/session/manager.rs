//! Session manager and connection loop.
//!
//! The manager owns exactly one live session. A background task (the
//! connection loop) is the only code that opens, stores, or tears down that
//! session, and the only writer of the published [`Status`]. Callers talk to
//! the loop through a command channel.
//!
//! # Connection Loop
//!
//! ```text
//!            ┌────────────── open failed: back off, retry ─────┐
//!            ▼                                                 │
//! start ─► Connecting ─── open ok ──► Connected ── Close ──► Closing ──► Closed
//!            ▲                            │
//!            └──── Reconnect(current) ────┘
//! ```
//!
//! - `Close` wins over any reconnect queued alongside it.
//! - `Close` interrupts both an in-flight open and a backoff sleep.
//! - A reconnect for any session other than the live one is ignored.
//! - Running out of connect budget is published once per sequence; the loop
//!   then keeps retrying at the capped delay until closed.
//! - A rejected token, or an endpoint that can never work, ends the loop.
//! - Every loop start bumps the status epoch. A loop only writes status and
//!   touches the session slot while its epoch is current, so a loop still
//!   tearing down can never overwrite its successor.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::auth::TokenProvider;
use crate::backoff::{BackoffPolicy, BackoffState};
use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::{Request, Response};
use crate::transport::{Connector, Session};

use super::options::SessionOptions;
use super::state::{ConnectionState, Rejection, Status};

// ============================================================================
// Types
// ============================================================================

/// Commands accepted by the connection loop.
#[derive(Debug, Clone, Copy)]
enum LoopCommand {
    /// Tear down and stop.
    Close,
    /// Replace the given session with a new one.
    Reconnect(SessionId),
}

/// What woke a connected loop.
enum Wakeup {
    Close,
    Reconnect,
}

/// Result of one connect sequence.
enum Established {
    Opened(Box<dyn Session>),
    Closed,
    Rejected(Rejection),
}

/// The live session and its generation.
struct LiveSession {
    id: SessionId,
    epoch: u64,
    session: Arc<dyn Session>,
}

/// Handle to a running connection loop.
struct LoopHandle {
    epoch: u64,
    command_tx: mpsc::UnboundedSender<LoopCommand>,
    task: JoinHandle<()>,
}

/// A failed dispatch and the session it ran on.
#[derive(Debug)]
pub(crate) struct DispatchFailure {
    /// Session that produced the error, `None` if there was none.
    pub(crate) session: Option<SessionId>,
    /// The error.
    pub(crate) error: Error,
}

/// State shared with the connection loop.
struct Shared {
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    connect_backoff: BackoffPolicy,
    status: watch::Sender<Status>,
    session: RwLock<Option<LiveSession>>,
    open_attempts: AtomicU64,
}

impl Shared {
    /// Applies `update` if `epoch` still owns the status.
    fn publish(&self, epoch: u64, update: impl FnOnce(&mut Status)) {
        let applied = self.status.send_if_modified(|status| {
            if status.epoch != epoch {
                return false;
            }
            update(status);
            true
        });

        if !applied {
            trace!(epoch, "Dropping status update from a replaced loop");
        }
    }

    /// Takes the live session if it belongs to `epoch`.
    fn take_session(&self, epoch: u64) -> Option<LiveSession> {
        let mut slot = self.session.write();

        if slot.as_ref().is_some_and(|live| live.epoch == epoch) {
            slot.take()
        } else {
            None
        }
    }
}

// ============================================================================
// SessionManager
// ============================================================================

/// Owns the session lifecycle: connect, close, reconnect.
///
/// # Example
///
/// ```ignore
/// let manager = SessionManager::new(connector, tokens, SessionOptions::default());
/// manager.connect().await?;
/// assert_eq!(manager.state(), ConnectionState::Connected);
/// manager.close().await;
/// ```
pub struct SessionManager {
    shared: Arc<Shared>,
    options: SessionOptions,
    driver: Mutex<Option<LoopHandle>>,
}

impl SessionManager {
    /// Creates a disconnected manager. Nothing is opened until `connect`.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
        options: SessionOptions,
    ) -> Self {
        let (status, _) = watch::channel(Status::default());

        Self {
            shared: Arc::new(Shared {
                connector,
                tokens,
                connect_backoff: options.connect_backoff.clone(),
                status,
                session: RwLock::new(None),
                open_attempts: AtomicU64::new(0),
            }),
            options,
            driver: Mutex::new(None),
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.status.borrow().state
    }

    /// Returns the live session's ID, if connected.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.shared.status.borrow().session
    }

    /// Transport opens attempted over the manager's lifetime.
    #[inline]
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.shared.open_attempts.load(Ordering::Relaxed)
    }

    /// Returns the options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Ensures a session is live.
    ///
    /// Returns immediately when already connected. Otherwise starts the
    /// connection loop if it is not running and waits for it. The loop keeps
    /// running after this call gives up.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectTimeout`] if the connect timeout elapses, or the
    ///   loop runs out of connect budget while this call waits
    /// - [`Error::Auth`] if the token was rejected
    /// - [`Error::Config`] if the endpoint can never be opened
    /// - [`Error::SessionClosed`] if the manager was closed meanwhile
    pub async fn connect(&self) -> Result<()> {
        if self.state() == ConnectionState::Connected {
            trace!("Already connected");
            return Ok(());
        }

        self.ensure_loop();

        let mut status_rx = self.shared.status.subscribe();
        let baseline = status_rx.borrow().exhaustions;
        let wait = self.options.connect_timeout;

        match timeout(wait, self.wait_connected(&mut status_rx, baseline)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = wait.as_millis() as u64,
                    "Timed out waiting for connection"
                );
                Err(Error::connect_timeout(wait.as_millis() as u64))
            }
        }
    }

    /// Closes the session and stops the connection loop.
    ///
    /// Waits up to the close timeout, then aborts the loop. Safe to call at
    /// any time, including before the first `connect`. A `connect` issued
    /// while this call waits starts a new loop that the old one cannot
    /// disturb.
    pub async fn close(&self) {
        info!("Disconnecting");

        let handle = {
            let mut driver = self.driver.lock();
            let handle = driver.take();
            if handle.is_none() {
                self.shared.status.send_modify(|status| {
                    status.state = ConnectionState::Closed;
                    status.session = None;
                });
            }
            handle
        };

        let Some(LoopHandle {
            epoch,
            command_tx,
            mut task,
        }) = handle
        else {
            debug!("No connection loop running");
            return;
        };

        if let Err(e) = command_tx.send(LoopCommand::Close) {
            debug!(epoch, command = ?e.0, "Connection loop already stopped");
        }

        if timeout(self.options.close_timeout, &mut task).await.is_err() {
            warn!(
                timeout_ms = self.options.close_timeout.as_millis() as u64,
                "Connection loop did not stop in time, aborting"
            );
            task.abort();

            if let Some(live) = self.shared.take_session(epoch) {
                tokio::spawn(async move { live.session.close().await });
            }
            self.shared.publish(epoch, |status| {
                status.state = ConnectionState::Closed;
                status.session = None;
            });
        }

        info!("Connection closed");
    }

    /// Asks the loop to replace `session`.
    ///
    /// Ignored unless `session` is the live one and the manager is connected.
    pub(crate) fn request_reconnect(&self, session: SessionId) {
        let (state, current) = {
            let status = self.shared.status.borrow();
            (status.state, status.session)
        };

        if state != ConnectionState::Connected || current != Some(session) {
            debug!(%session, %state, "Reconnect request ignored");
            return;
        }

        if let Some(handle) = self.driver.lock().as_ref() {
            match handle.command_tx.send(LoopCommand::Reconnect(session)) {
                Ok(()) => info!(%session, "Reconnect requested"),
                Err(e) => {
                    debug!(%session, command = ?e.0, "Connection loop already stopped");
                }
            }
        }
    }

    /// Sends a request over the live session.
    pub(crate) async fn dispatch(
        &self,
        request: &Request,
    ) -> std::result::Result<Response, DispatchFailure> {
        let live = self
            .shared
            .session
            .read()
            .as_ref()
            .map(|live| (live.id, Arc::clone(&live.session)));

        let Some((id, session)) = live else {
            return Err(DispatchFailure {
                session: None,
                error: Error::TransportClosed,
            });
        };

        trace!(session = %id, "Dispatching request");

        session
            .execute(request)
            .await
            .map_err(|error| DispatchFailure {
                session: Some(id),
                error,
            })
    }

    /// Starts the connection loop unless one is running.
    fn ensure_loop(&self) {
        let mut driver = self.driver.lock();

        if driver
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
        {
            return;
        }

        let mut epoch = 0;
        self.shared.status.send_modify(|status| {
            *status = Status::starting(status);
            epoch = status.epoch;
        });

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_loop(Arc::clone(&self.shared), epoch, command_rx));
        *driver = Some(LoopHandle {
            epoch,
            command_tx,
            task,
        });

        debug!(epoch, "Connection loop started");
    }

    /// Waits for `Connected`, a terminal state, or a new budget exhaustion.
    async fn wait_connected(
        &self,
        status_rx: &mut watch::Receiver<Status>,
        baseline: u64,
    ) -> Result<()> {
        loop {
            {
                let status = status_rx.borrow_and_update();

                match status.state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Closing | ConnectionState::Closed => {
                        return Err(status
                            .rejection
                            .as_ref()
                            .map_or(Error::SessionClosed, Rejection::to_error));
                    }
                    ConnectionState::Disconnected | ConnectionState::Connecting => {}
                }

                if status.exhaustions > baseline {
                    let budget_ms = self.options.connect_budget_ms();
                    warn!(budget_ms, "Connect budget exhausted");
                    return Err(Error::connect_timeout(budget_ms));
                }
            }

            if status_rx.changed().await.is_err() {
                return Err(Error::SessionClosed);
            }
        }
    }
}

// ============================================================================
// Connection Loop
// ============================================================================

/// Background task owning the live session.
async fn run_loop(
    shared: Arc<Shared>,
    epoch: u64,
    mut commands: mpsc::UnboundedReceiver<LoopCommand>,
) {
    'connect: loop {
        info!(epoch, "Connecting to API");
        shared.publish(epoch, |status| {
            status.state = ConnectionState::Connecting;
            status.session = None;
        });

        let mut backoff = shared.connect_backoff.start();

        let session = match establish(&shared, epoch, &mut backoff, &mut commands).await {
            Established::Opened(session) => session,
            Established::Closed => break 'connect,
            Established::Rejected(rejection) => {
                error!(error = %rejection, "Open rejected, connection loop stopped");
                shared.publish(epoch, |status| {
                    status.state = ConnectionState::Closed;
                    status.session = None;
                    status.rejection = Some(rejection);
                });
                return;
            }
        };

        let id = SessionId::next();
        let replaced = shared.session.write().replace(LiveSession {
            id,
            epoch,
            session: Arc::from(session),
        });
        if let Some(stale) = replaced {
            debug!(
                session = %stale.id,
                epoch = stale.epoch,
                "Closing session left by a replaced loop"
            );
            stale.session.close().await;
        }

        // Anything queued while connecting targets a session that is gone
        if drain_stale(&mut commands) {
            shared.publish(epoch, |status| status.state = ConnectionState::Closing);
            teardown(&shared, epoch).await;
            break 'connect;
        }

        shared.publish(epoch, |status| {
            status.state = ConnectionState::Connected;
            status.session = Some(id);
        });
        info!(session = %id, attempts = backoff.failures() + 1, "Connected to API");

        match wait_for_request(&mut commands, id).await {
            Wakeup::Close => {
                shared.publish(epoch, |status| {
                    status.state = ConnectionState::Closing;
                    status.session = None;
                });
                teardown(&shared, epoch).await;
                break 'connect;
            }
            Wakeup::Reconnect => {
                info!(session = %id, "Reconnecting");
                teardown(&shared, epoch).await;
            }
        }
    }

    shared.publish(epoch, |status| {
        status.state = ConnectionState::Closed;
        status.session = None;
    });
    info!(epoch, "Connection loop stopped");
}

/// Opens a session, backing off between failures.
async fn establish(
    shared: &Shared,
    epoch: u64,
    backoff: &mut BackoffState,
    commands: &mut mpsc::UnboundedReceiver<LoopCommand>,
) -> Established {
    let mut exhausted = false;

    loop {
        shared.open_attempts.fetch_add(1, Ordering::Relaxed);
        debug!(attempt = backoff.failures() + 1, "Opening transport");

        let Some(result) = until_closed(open_transport(shared), commands).await else {
            debug!("Close requested while opening");
            return Established::Closed;
        };

        let error = match result {
            Ok(session) => return Established::Opened(session),
            Err(error) => match Rejection::from_error(&error) {
                Some(rejection) => return Established::Rejected(rejection),
                None => error,
            },
        };

        let delay = match backoff.next_delay() {
            // Never sleep past the budget, so exhaustion is noticed on time
            Some(delay) => backoff.remaining().map_or(delay, |left| delay.min(left)),
            None => {
                if !exhausted {
                    exhausted = true;
                    warn!(
                        elapsed_ms = backoff.elapsed().as_millis() as u64,
                        "Connect budget exhausted, retrying at capped delay"
                    );
                    shared.publish(epoch, |status| status.exhaustions += 1);
                }
                shared.connect_backoff.max_delay()
            }
        };

        warn!(
            error = %error,
            failures = backoff.failures(),
            delay_ms = delay.as_millis() as u64,
            "Connect attempt failed"
        );

        if until_closed(sleep(delay), commands).await.is_none() {
            debug!("Close requested during backoff");
            return Established::Closed;
        }
    }
}

/// Fetches a token and opens the transport.
async fn open_transport(shared: &Shared) -> Result<Box<dyn Session>> {
    let token = shared.tokens.token().await?;
    shared.connector.open(&token).await
}

/// Drives `future` unless a close arrives first. Reconnects are dropped.
async fn until_closed<F: Future>(
    future: F,
    commands: &mut mpsc::UnboundedReceiver<LoopCommand>,
) -> Option<F::Output> {
    tokio::pin!(future);

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(LoopCommand::Close) | None => return None,
                Some(LoopCommand::Reconnect(stale)) => {
                    trace!(session = %stale, "Reconnect ignored while connecting");
                }
            },

            output = &mut future => return Some(output),
        }
    }
}

/// Discards queued reconnects. Returns `true` if a close was queued.
fn drain_stale(commands: &mut mpsc::UnboundedReceiver<LoopCommand>) -> bool {
    while let Ok(command) = commands.try_recv() {
        match command {
            LoopCommand::Close => return true,
            LoopCommand::Reconnect(stale) => {
                trace!(session = %stale, "Dropping stale reconnect");
            }
        }
    }
    false
}

/// Waits while connected. Close is checked before reconnect.
async fn wait_for_request(
    commands: &mut mpsc::UnboundedReceiver<LoopCommand>,
    current: SessionId,
) -> Wakeup {
    loop {
        let Some(first) = commands.recv().await else {
            return Wakeup::Close;
        };

        let mut reconnect = false;
        let mut pending = Some(first);

        while let Some(command) = pending.take().or_else(|| commands.try_recv().ok()) {
            match command {
                LoopCommand::Close => return Wakeup::Close,
                LoopCommand::Reconnect(session) if session == current => reconnect = true,
                LoopCommand::Reconnect(stale) => {
                    debug!(session = %stale, "Ignoring reconnect for stale session");
                }
            }
        }

        if reconnect {
            return Wakeup::Reconnect;
        }
    }
}

/// Removes and closes the live session owned by `epoch`.
async fn teardown(shared: &Shared, epoch: u64) {
    if let Some(live) = shared.take_session(epoch) {
        live.session.close().await;
        debug!(session = %live.id, "Disconnected from API");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::Instant;

    use crate::auth::StaticToken;
    use crate::backoff::Budget;
    use crate::transport::stub::{StubConnector, init_tracing};

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    fn options() -> SessionOptions {
        SessionOptions {
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(10),
            connect_backoff: BackoffPolicy::new(millis(100), 2.0, Duration::from_secs(1))
                .with_budget(Budget::Elapsed(Duration::from_secs(300))),
        }
    }

    fn manager(connector: &StubConnector, options: SessionOptions) -> SessionManager {
        init_tracing();
        SessionManager::new(
            Arc::new(connector.clone()),
            Arc::new(StaticToken::new("token")),
            options,
        )
    }

    /// Yields until `condition` holds, advancing paused time in small steps.
    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..1_000 {
            if condition() {
                return;
            }
            sleep(millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let connector = StubConnector::new();
        let manager = manager(&connector, options());

        manager.connect().await.expect("first connect");
        let session = manager.session_id();
        manager.connect().await.expect("second connect");

        assert_eq!(connector.opens(), 1);
        assert_eq!(manager.session_id(), session);
        assert_eq!(manager.state(), ConnectionState::Connected);

        manager.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_after_close_uses_fresh_session() {
        let connector = StubConnector::new();
        let manager = manager(&connector, options());

        manager.connect().await.expect("connect");
        let first = manager.session_id().expect("session");

        manager.close().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(manager.session_id(), None);
        assert_eq!(connector.teardowns(), 1);

        manager.connect().await.expect("reconnect");
        let second = manager.session_id().expect("session");

        assert_ne!(first, second);
        assert_eq!(connector.opens(), 2);

        manager.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_waits_while_opening() {
        let connector = StubConnector::new().open_delay(Duration::from_secs(1));
        let manager = manager(&connector, options());

        let mut connect = tokio_test::task::spawn(manager.connect());
        tokio_test::assert_pending!(connect.poll());
        assert_eq!(manager.state(), ConnectionState::Connecting);
        drop(connect);

        manager.connect().await.expect("connect");
        assert_eq!(connector.opens(), 1);

        manager.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_opens_back_off_non_decreasing() {
        let connector = StubConnector::new().fail_opens(2);
        let manager = manager(&connector, options());

        manager.connect().await.expect("connect");
        assert_eq!(connector.opens(), 3);
        assert_eq!(manager.connect_attempts(), 3);

        let log = connector.open_log();
        let gaps: Vec<Duration> = log.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps.len(), 2);
        assert!(gaps[0] >= millis(100));
        assert!(gaps[1] >= gaps[0]);
        assert!(gaps.iter().all(|gap| *gap <= Duration::from_secs(1) + millis(5)));

        manager.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_times_out_but_loop_keeps_trying() {
        let connector = StubConnector::new().fail_opens(u32::MAX);
        let mut options = options();
        options.connect_backoff = options
            .connect_backoff
            .with_budget(Budget::Elapsed(Duration::from_secs(2)));
        let manager = manager(&connector, options);

        let started = Instant::now();
        let err = manager.connect().await.unwrap_err();
        let waited = started.elapsed();

        assert!(matches!(err, Error::ConnectTimeout { timeout_ms: 2000 }), "got {err:?}");
        assert!(waited >= Duration::from_secs(2));
        assert!(waited <= Duration::from_secs(2) + millis(50));

        let attempts = connector.opens();
        sleep(Duration::from_secs(5)).await;
        assert!(connector.opens() > attempts);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.close().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_caller_local() {
        let connector = StubConnector::new().fail_opens(u32::MAX);
        let mut options = options();
        options.connect_timeout = Duration::from_secs(2);
        let manager = manager(&connector, options);

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, Error::ConnectTimeout { timeout_ms: 2000 }));

        // A second caller joins the same loop rather than starting another
        let before = connector.opens();
        let err = manager.connect().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(connector.opens() > before);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_interrupts_backoff() {
        let connector = StubConnector::new().fail_opens(u32::MAX);
        let mut options = options();
        options.connect_timeout = millis(500);
        options.connect_backoff = BackoffPolicy::new(
            Duration::from_secs(60),
            2.0,
            Duration::from_secs(60),
        );
        let manager = manager(&connector, options);

        assert!(manager.connect().await.is_err());
        assert_eq!(connector.opens(), 1);

        let started = Instant::now();
        manager.close().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_interrupts_open_in_flight() {
        let connector = StubConnector::new().open_delay(Duration::from_secs(60));
        let mut options = options();
        options.connect_timeout = millis(500);
        let manager = manager(&connector, options);

        assert!(manager.connect().await.unwrap_err().is_timeout());

        let started = Instant::now();
        manager.close().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(connector.teardowns(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_without_connect() {
        let connector = StubConnector::new();
        let manager = manager(&connector, options());

        manager.close().await;
        manager.close().await;

        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(connector.opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_token_is_fatal() {
        let connector = StubConnector::new().reject_auth();
        let manager = manager(&connector, options());

        let err = manager.connect().await.unwrap_err();
        assert!(err.is_auth_error(), "got {err:?}");
        assert_eq!(err.to_string(), "Authentication failed: token rejected");

        sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.opens(), 1);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_after_loop_stopped_on_its_own() {
        let connector = StubConnector::new().reject_auth();
        let manager = manager(&connector, options());

        manager.connect().await.unwrap_err();
        sleep(millis(100)).await;

        // The loop is gone, so the close command has no receiver
        manager.close().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(connector.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_endpoint_is_fatal() {
        let connector = StubConnector::new().misconfigured();
        let manager = manager(&connector, options());

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }), "got {err:?}");

        sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.opens(), 1);
        assert_eq!(manager.state(), ConnectionState::Closed);

        // Waiters arriving later see the same reason, and a new loop tries again
        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }), "got {err:?}");
        assert_eq!(connector.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_during_slow_close_survives_old_loop() {
        let connector = StubConnector::new().close_delay(millis(200));
        let manager = Arc::new(manager(&connector, options()));

        manager.connect().await.expect("connect");
        let first = manager.session_id().expect("session");

        let closing = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.close().await }
        });
        sleep(millis(50)).await;
        assert_eq!(manager.state(), ConnectionState::Closing);

        manager.connect().await.expect("connect while closing");
        let second = manager.session_id().expect("session");
        assert_ne!(first, second);

        closing.await.expect("close task");
        assert_eq!(connector.teardowns(), 1);

        // The old loop's final status must not have replaced the new one
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.session_id(), Some(second));
        manager.connect().await.expect("later connect");
        assert_eq!(connector.opens(), 2);

        let response = manager.dispatch(&Request::new("{ __typename }")).await;
        assert!(response.is_ok(), "got {response:?}");

        manager.close().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(connector.teardowns(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_close_leaves_new_loop_alone() {
        let connector = StubConnector::new().close_delay(Duration::from_secs(5));
        let options = SessionOptions {
            close_timeout: millis(100),
            ..options()
        };
        let manager = Arc::new(manager(&connector, options));

        manager.connect().await.expect("connect");

        let closing = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.close().await }
        });
        sleep(millis(50)).await;
        manager.connect().await.expect("connect while closing");
        let second = manager.session_id();

        // close() gives up on the old loop and aborts it
        closing.await.expect("close task");

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.session_id(), second);
        manager.connect().await.expect("later connect");
        assert_eq!(connector.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_token_is_fatal() {
        let connector = StubConnector::new();
        let manager = SessionManager::new(
            Arc::new(connector.clone()),
            Arc::new(StaticToken::new("")),
            options(),
        );

        let err = manager.connect().await.unwrap_err();
        assert!(err.is_auth_error());
        assert_eq!(connector.opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replaces_session() {
        let connector = StubConnector::new();
        let manager = manager(&connector, options());

        manager.connect().await.expect("connect");
        let first = manager.session_id().expect("session");

        manager.request_reconnect(first);
        eventually(|| {
            manager.state() == ConnectionState::Connected && manager.session_id() != Some(first)
        })
        .await;

        assert_eq!(connector.opens(), 2);
        assert_eq!(connector.teardowns(), 1);

        manager.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reconnect_is_ignored() {
        let connector = StubConnector::new();
        let manager = manager(&connector, options());

        let stale = SessionId::next();
        manager.request_reconnect(stale);

        manager.connect().await.expect("connect");
        manager.request_reconnect(stale);
        sleep(Duration::from_secs(1)).await;

        assert_eq!(connector.opens(), 1);
        assert_eq!(connector.teardowns(), 0);

        manager.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_wins_over_pending_reconnect() {
        let connector = StubConnector::new();
        let manager = manager(&connector, options());

        manager.connect().await.expect("connect");
        let session = manager.session_id().expect("session");

        manager.request_reconnect(session);
        manager.close().await;

        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(connector.opens(), 1);
        assert_eq!(connector.teardowns(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_without_session() {
        let connector = StubConnector::new();
        let manager = manager(&connector, options());

        let failure = manager
            .dispatch(&Request::new("{ __typename }"))
            .await
            .unwrap_err();
        assert!(failure.session.is_none());
        assert!(matches!(failure.error, Error::TransportClosed));
    }
}
