//! Auto-reconnecting websocket connection to the coordinator

use super::{Connection, ConnectionError, ConnectionState, Result};
use crate::config::{CoordinatorConfig, ReconnectConfig};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Where to (re)connect and with which credential
#[derive(Clone)]
struct Target {
    url: String,
    auth_token: String,
}

/// Websocket that keeps itself connected
///
/// Lifecycle:
/// 1. `dial` records the target and makes the first attempt
/// 2. Any dial or read failure moves to `Disconnected` and starts one
///    background reconnect task
/// 3. The reconnect task sleeps `min_interval * factor^n` (capped at
///    `max_interval`) between attempts until connected or closed
/// 4. `close` cancels reconnects, sends a close frame and unblocks readers
///
/// The sink and the source are locked separately so `close` never waits
/// behind a blocked read.
pub struct ReconnectingSocket {
    inner: Arc<Inner>,
}

struct Inner {
    reconnect: ReconnectConfig,
    handshake_timeout: Duration,
    state: watch::Sender<ConnectionState>,
    target: Mutex<Option<Target>>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    source: tokio::sync::Mutex<Option<WsSource>>,
    shutdown: CancellationToken,
    reconnecting: AtomicBool,
}

impl ReconnectingSocket {
    pub fn new(reconnect: ReconnectConfig, handshake_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                reconnect,
                handshake_timeout,
                state: watch::Sender::new(ConnectionState::Disconnected),
                target: Mutex::new(None),
                sink: tokio::sync::Mutex::new(None),
                source: tokio::sync::Mutex::new(None),
                shutdown: CancellationToken::new(),
                reconnecting: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(
            config.reconnect.clone(),
            config.handshake_timeout.as_duration(),
        )
    }
}

impl Drop for ReconnectingSocket {
    fn drop(&mut self) {
        // Stops a pending reconnect task from outliving the socket
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Move to `next` unless already closing or closed
    fn transition(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            debug!(from = %state, to = %next, "Connection state change");
            *state = next;
            true
        })
    }

    fn target(&self) -> Option<Target> {
        self.target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn connect_once(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        let target = self.target().ok_or(ConnectionError::NotConnected)?;

        let mut request = target
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;
        let auth = HeaderValue::from_str(&target.auth_token)
            .map_err(|e| ConnectionError::InvalidAuthorization(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        self.transition(ConnectionState::Connecting);

        let connected = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(ConnectionError::Closed),
            result = tokio::time::timeout(self.handshake_timeout, connect_async(request)) => result,
        };

        let (stream, _response) = match connected {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                self.transition(ConnectionState::Disconnected);
                return Err(match e {
                    WsError::Url(e) => ConnectionError::InvalidUrl(e.to_string()),
                    e => ConnectionError::DialFailed(e.to_string()),
                });
            }
            Err(_) => {
                self.transition(ConnectionState::Disconnected);
                return Err(ConnectionError::HandshakeTimeout(self.handshake_timeout));
            }
        };

        let (sink, source) = stream.split();
        *self.sink.lock().await = Some(sink);
        *self.source.lock().await = Some(source);

        if !self.transition(ConnectionState::Connected) && self.state().is_terminal() {
            // Closed while the handshake was in flight
            self.release().await;
            return Err(ConnectionError::Closed);
        }

        info!(url = %target.url, "Connected to coordinator");
        Ok(())
    }

    /// Drop both halves, sending a close frame if the sink is still there
    async fn release(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.send(Message::Close(None)).await {
                debug!(error = %e, "Close frame not sent");
            }
            let _ = sink.close().await;
        }
        self.source.lock().await.take();
    }

    async fn handle_drop(self: &Arc<Self>, reason: &str) {
        self.sink.lock().await.take();
        if self.transition(ConnectionState::Disconnected) {
            warn!(reason, "Coordinator connection lost");
        }
        self.spawn_reconnect();
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() || self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = self.clone();
        tokio::spawn(async move {
            loop {
                inner.reconnect_until_connected().await;
                inner.reconnecting.store(false, Ordering::SeqCst);

                // A drop between connecting and clearing the flag would
                // otherwise go unnoticed
                if inner.shutdown.is_cancelled()
                    || inner.state() != ConnectionState::Disconnected
                    || inner.reconnecting.swap(true, Ordering::SeqCst)
                {
                    break;
                }
            }
        });
    }

    async fn reconnect_until_connected(&self) {
        let mut attempt: u32 = 0;
        loop {
            let delay = self.reconnect.backoff(attempt);
            debug!(attempt, ?delay, "Scheduling reconnect");

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.connect_once().await {
                Ok(()) => {
                    info!(attempts = attempt + 1, "Reconnected to coordinator");
                    return;
                }
                Err(ConnectionError::Closed) => return,
                Err(e) if e.is_permanent() => {
                    error!(error = %e, "Giving up on reconnect");
                    return;
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Reconnect attempt failed");
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

#[async_trait]
impl Connection for ReconnectingSocket {
    async fn dial(&self, url: &str, auth_token: &str) -> Result<()> {
        *self
            .inner
            .target
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Target {
            url: url.to_string(),
            auth_token: auth_token.to_string(),
        });

        info!(url, "Dialing coordinator");
        match self.inner.connect_once().await {
            Ok(()) => Ok(()),
            Err(ConnectionError::Closed) => Err(ConnectionError::Closed),
            Err(e) if e.is_permanent() => {
                error!(url, error = %e, "Dial can never succeed, not reconnecting");
                self.inner.transition(ConnectionState::Disconnected);
                Err(e)
            }
            Err(e) => {
                warn!(url, error = %e, "Initial dial failed, reconnecting in background");
                self.inner.transition(ConnectionState::Disconnected);
                self.inner.spawn_reconnect();
                Err(e)
            }
        }
    }

    async fn read_frame(&self) -> Result<String> {
        let inner = &self.inner;

        let mut source = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => return Err(ConnectionError::Closed),
            guard = inner.source.lock() => guard,
        };
        let Some(stream) = source.as_mut() else {
            return Err(ConnectionError::NotConnected);
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = inner.shutdown.cancelled() => return Err(ConnectionError::Closed),
                next = stream.next() => next,
            };

            let reason = match next {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data)
                        .map_err(|e| ConnectionError::ReadFailed(format!("binary frame is not UTF-8: {}", e)));
                }
                // Pongs are answered by tungstenite on the next read
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    format!("closed by coordinator: {:?}", frame.map(|f| f.reason.into_owned()))
                }
                Some(Err(e)) => e.to_string(),
                None => "stream ended".to_string(),
            };

            source.take();
            drop(source);
            inner.handle_drop(&reason).await;
            return Err(ConnectionError::ReadFailed(reason));
        }
    }

    fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    async fn close(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();

        let already_closed = !inner.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = ConnectionState::Closing;
            true
        });
        if already_closed {
            return;
        }

        inner.release().await;
        inner.state.send_replace(ConnectionState::Closed);
        info!("Coordinator connection closed");
    }

    fn url(&self) -> String {
        self.inner
            .target()
            .map(|target| target.url)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::HumanDuration;

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            min_interval: HumanDuration::from_millis(20),
            max_interval: HumanDuration::from_millis(50),
            factor: 2.0,
        }
    }

    #[tokio::test]
    async fn test_read_before_dial_is_not_connected() {
        let socket = ReconnectingSocket::new(fast_reconnect(), Duration::from_secs(1));

        assert_eq!(socket.state(), ConnectionState::Disconnected);
        assert!(matches!(
            socket.read_frame().await,
            Err(ConnectionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_dial_refused_keeps_reconnecting_until_closed() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let socket = ReconnectingSocket::new(fast_reconnect(), Duration::from_secs(1));
        let url = format!("ws://{}/ws/worker", addr);

        let result = socket.dial(&url, "token").await;
        assert!(matches!(result, Err(ConnectionError::DialFailed(_))));
        assert!(!socket.is_connected());
        assert_eq!(socket.url(), url);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!socket.is_connected());

        socket.close().await;
        assert_eq!(socket.state(), ConnectionState::Closed);

        // Idempotent
        socket.close().await;
        assert_eq!(socket.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_invalid_token_header_rejected() {
        let socket = ReconnectingSocket::new(fast_reconnect(), Duration::from_secs(1));

        let result = socket.dial("ws://127.0.0.1:1/ws", "bad\ntoken").await;
        assert!(matches!(result, Err(ConnectionError::InvalidAuthorization(_))));
        assert!(!socket.inner.reconnecting.load(Ordering::SeqCst));
        assert_eq!(socket.state(), ConnectionState::Disconnected);
        socket.close().await;
    }

    #[tokio::test]
    async fn test_unusable_url_is_not_retried() {
        let socket = ReconnectingSocket::new(fast_reconnect(), Duration::from_secs(1));

        let unparseable = socket.dial("not a url", "token").await;
        assert!(matches!(unparseable, Err(ConnectionError::InvalidUrl(_))));

        let wrong_scheme = socket.dial("http://127.0.0.1/ws", "token").await;
        assert!(matches!(wrong_scheme, Err(ConnectionError::InvalidUrl(_))));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!socket.inner.reconnecting.load(Ordering::SeqCst));
        assert_eq!(socket.state(), ConnectionState::Disconnected);
        socket.close().await;
    }

    #[tokio::test]
    async fn test_read_after_close_is_closed() {
        let socket = ReconnectingSocket::new(fast_reconnect(), Duration::from_secs(1));
        socket.close().await;

        assert!(matches!(socket.read_frame().await, Err(ConnectionError::Closed)));
    }
}
