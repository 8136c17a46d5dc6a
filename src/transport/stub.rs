//! In-memory connector for tests.
//!
//! Opens are scripted by a failure count; every session pops its next reply
//! from a shared queue, falling back to a fixed reply when the queue is empty.
//! Also home to [`init_tracing`], shared by every test module.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::protocol::{GraphQLError, Request, Response};

use super::{Connector, Session};

/// Scripted outcome of one `execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Ok,
    TransportClosed,
    Query,
    Unknown,
}

#[derive(Debug)]
struct StubState {
    opens: AtomicU32,
    failing_opens: AtomicU32,
    reject_auth: AtomicBool,
    misconfigured: AtomicBool,
    open_delay: Mutex<Duration>,
    open_log: Mutex<Vec<Instant>>,
    replies: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    reply_delay: Mutex<Duration>,
    close_delay: Mutex<Duration>,
    dispatches: AtomicU32,
    teardowns: AtomicU32,
}

/// Connector whose sessions answer from a script.
#[derive(Debug, Clone)]
pub(crate) struct StubConnector {
    state: Arc<StubState>,
}

impl StubConnector {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(StubState {
                opens: AtomicU32::new(0),
                failing_opens: AtomicU32::new(0),
                reject_auth: AtomicBool::new(false),
                misconfigured: AtomicBool::new(false),
                open_delay: Mutex::new(Duration::ZERO),
                open_log: Mutex::new(Vec::new()),
                replies: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(Reply::Ok),
                reply_delay: Mutex::new(Duration::ZERO),
                close_delay: Mutex::new(Duration::ZERO),
                dispatches: AtomicU32::new(0),
                teardowns: AtomicU32::new(0),
            }),
        }
    }

    /// Fails the next `count` opens. `u32::MAX` fails forever.
    pub(crate) fn fail_opens(self, count: u32) -> Self {
        self.state.failing_opens.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) fn reject_auth(self) -> Self {
        self.state.reject_auth.store(true, Ordering::SeqCst);
        self
    }

    /// Every open fails as if the endpoint could never work.
    pub(crate) fn misconfigured(self) -> Self {
        self.state.misconfigured.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn open_delay(self, delay: Duration) -> Self {
        *self.state.open_delay.lock() = delay;
        self
    }

    pub(crate) fn replies(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.state.replies.lock().extend(replies);
        self
    }

    pub(crate) fn fallback(self, reply: Reply) -> Self {
        *self.state.fallback.lock() = reply;
        self
    }

    pub(crate) fn reply_delay(self, delay: Duration) -> Self {
        *self.state.reply_delay.lock() = delay;
        self
    }

    /// Time a session takes to close. It stops answering immediately.
    pub(crate) fn close_delay(self, delay: Duration) -> Self {
        *self.state.close_delay.lock() = delay;
        self
    }

    /// Open calls made, successful or not.
    pub(crate) fn opens(&self) -> u32 {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// When each open call started.
    pub(crate) fn open_log(&self) -> Vec<Instant> {
        self.state.open_log.lock().clone()
    }

    pub(crate) fn dispatches(&self) -> u32 {
        self.state.dispatches.load(Ordering::SeqCst)
    }

    pub(crate) fn teardowns(&self) -> u32 {
        self.state.teardowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StubConnector {
    async fn open(&self, _token: &str) -> Result<Box<dyn Session>> {
        let number = self.state.opens.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.open_log.lock().push(Instant::now());

        let delay = *self.state.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.state.reject_auth.load(Ordering::SeqCst) {
            return Err(Error::auth("token rejected"));
        }

        if self.state.misconfigured.load(Ordering::SeqCst) {
            return Err(Error::config("stub endpoint needs TLS"));
        }

        let failing = self.state.failing_opens.load(Ordering::SeqCst);
        if failing > 0 {
            if failing != u32::MAX {
                self.state.failing_opens.store(failing - 1, Ordering::SeqCst);
            }
            return Err(Error::connection("stub refused"));
        }

        Ok(Box::new(StubSession {
            number,
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct StubSession {
    number: u32,
    state: Arc<StubState>,
    closed: AtomicBool,
}

#[async_trait]
impl Session for StubSession {
    async fn execute(&self, _request: &Request) -> Result<Response> {
        self.state.dispatches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.reply_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TransportClosed);
        }

        let reply = self
            .state
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| *self.state.fallback.lock());

        match reply {
            Reply::Ok => Ok(Response::with_data(json!({ "session": self.number }))),
            Reply::TransportClosed => Err(Error::TransportClosed),
            Reply::Query => Err(Error::query(vec![GraphQLError::new("bad field")])),
            Reply::Unknown => Err(Error::unknown("stub glitch")),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let delay = *self.state.close_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Routes `tracing` output to the test harness.
///
/// Honors `RUST_LOG`, defaulting to `esologs_client=debug`. Safe to call from
/// every test; only the first call installs the subscriber.
pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("esologs_client=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
