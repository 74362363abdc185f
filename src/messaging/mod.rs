//! Coordinator connection abstraction
//!
//! `Connection` is the framing seam between the streaming client and the
//! transport. The production implementation is
//! [`websocket::ReconnectingSocket`]; [`MockConnection`] feeds frames from
//! memory for tests.

pub mod websocket;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{Notify, watch};

pub use websocket::ReconnectingSocket;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Dial failed: {0}")]
    DialFailed(String),

    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("Invalid coordinator url: {0}")]
    InvalidUrl(String),

    #[error("Invalid authorization header: {0}")]
    InvalidAuthorization(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Connection closed")]
    Closed,
}

impl ConnectionError {
    /// Retrying with the same url and token cannot succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::InvalidUrl(_) | Self::InvalidAuthorization(_))
    }
}

pub type Result<T> = std::result::Result<T, ConnectionError>;

/// Lifecycle of the coordinator connection
///
/// `Closing` and `Closed` are reachable from every state; nothing leaves
/// `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Duplex connection to the coordinator, shared behind an `Arc`
///
/// Reads come from a single reader task; `close` may be called from any
/// other task at any time and must unblock a pending `read_frame`.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Establish the connection, attaching `auth_token` as the
    /// `Authorization` header. Reconnects reuse the same token.
    async fn dial(&self, url: &str, auth_token: &str) -> Result<()>;

    /// Next text frame from the coordinator
    async fn read_frame(&self) -> Result<String>;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn state(&self) -> ConnectionState;

    /// Close the connection and stop reconnecting. Idempotent.
    async fn close(&self);

    fn url(&self) -> String;
}

/// In-memory connection for tests
///
/// Frames pushed with `push_frame` are returned by `read_frame` in order.
/// `disconnect`/`reconnect` flip liveness, `push_error` injects a read error.
/// A read pending across `disconnect` fails with `NotConnected`, like a
/// dropped socket would.
#[derive(Debug)]
pub struct MockConnection {
    frames: Mutex<VecDeque<Result<String>>>,
    arrived: Notify,
    state: watch::Sender<ConnectionState>,
    url: Mutex<String>,
    dial_tokens: Mutex<Vec<String>>,
    close_calls: AtomicUsize,
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
            state: watch::Sender::new(ConnectionState::Disconnected),
            url: Mutex::new(String::new()),
            dial_tokens: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn push_frame(&self, frame: impl Into<String>) {
        self.push(Ok(frame.into()));
    }

    pub fn push_error(&self, error: ConnectionError) {
        self.push(Err(error));
    }

    fn push(&self, entry: Result<String>) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(entry);
        self.arrived.notify_one();
    }

    /// Simulate a dropped socket
    pub fn disconnect(&self) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = ConnectionState::Disconnected;
            true
        });
    }

    /// Simulate the transport's own reconnect succeeding
    pub fn reconnect(&self) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = ConnectionState::Connected;
            true
        });
    }

    /// Tokens presented on every `dial`
    pub fn dial_tokens(&self) -> Vec<String> {
        self.dial_tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn next_frame(&self) -> Option<Result<String>> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn dial(&self, url: &str, auth_token: &str) -> Result<()> {
        *self.url.lock().unwrap_or_else(PoisonError::into_inner) = url.to_string();
        self.dial_tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(auth_token.to_string());
        self.reconnect();
        tracing::debug!(url, "Mock dial");
        Ok(())
    }

    async fn read_frame(&self) -> Result<String> {
        let mut state_rx = self.state.subscribe();
        loop {
            // Register interest before checking, so a push in between is not lost
            let arrived = self.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            let state = *state_rx.borrow_and_update();
            if state.is_terminal() {
                return Err(ConnectionError::Closed);
            }
            if state != ConnectionState::Connected {
                return Err(ConnectionError::NotConnected);
            }
            if let Some(entry) = self.next_frame() {
                return entry;
            }

            tokio::select! {
                _ = &mut arrived => {}
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Err(ConnectionError::Closed);
                    }
                }
            }
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Closing);
        self.state.send_replace(ConnectionState::Closed);
        tracing::debug!("Mock connection closed");
    }

    fn url(&self) -> String {
        self.url.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_mock_returns_frames_in_order() {
        let conn = MockConnection::new();
        conn.dial("ws://mock", "token").await.unwrap();
        conn.push_frame("one");
        conn.push_frame("two");

        assert_eq!(conn.read_frame().await.unwrap(), "one");
        assert_eq!(conn.read_frame().await.unwrap(), "two");
        assert!(conn.is_connected());
        assert_eq!(conn.dial_tokens(), vec!["token".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_read_waits_for_push() {
        let conn = Arc::new(MockConnection::new());
        conn.dial("ws://mock", "token").await.unwrap();

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.read_frame().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.push_frame("late");

        assert_eq!(reader.await.unwrap().unwrap(), "late");
    }

    #[tokio::test]
    async fn test_mock_close_unblocks_reader() {
        let conn = Arc::new(MockConnection::new());
        conn.dial("ws://mock", "token").await.unwrap();

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.read_frame().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close().await;

        assert!(matches!(reader.await.unwrap(), Err(ConnectionError::Closed)));
        assert_eq!(conn.state(), ConnectionState::Closed);

        // Closed is terminal
        conn.reconnect();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_mock_disconnect_fails_pending_read() {
        let conn = Arc::new(MockConnection::new());
        conn.dial("ws://mock", "token").await.unwrap();

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.read_frame().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.disconnect();

        assert!(matches!(reader.await.unwrap(), Err(ConnectionError::NotConnected)));
        assert!(!conn.is_connected());

        conn.reconnect();
        conn.push_frame("after");
        assert_eq!(conn.read_frame().await.unwrap(), "after");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
    }
}
