//! Streaming client: coordinator connection to dispatch channel
//!
//! One `StreamingClient` owns the read side of one logical coordinator
//! connection for its whole life, across any number of physical
//! reconnects. Each frame is decoded and routed:
//!
//! - `work_generate` with a valid hash goes to the dispatch channel
//! - `work_cancel` follows it down the same channel, so the broker
//!   applies both in wire order
//! - anything else is logged and dropped
//!
//! The loop only returns when the shutdown token fires. A separate closer
//! task closes the connection at that moment so a blocked read fails
//! instead of waiting for the next frame.

use crate::messaging::{Connection, ConnectionError};
use crate::observability::Metrics;
use crate::proto::{ClientRequest, ServerCommand};
use crate::queue::{Dispatch, DispatchSender};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Pause between liveness checks while disconnected
pub const DEFAULT_LIVENESS_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("tried to start the streaming client without an authorization token")]
    MissingAuthToken,
}

pub type Result<T> = std::result::Result<T, ClientError>;

pub struct StreamingClient {
    connection: Arc<dyn Connection>,
    dispatch_tx: DispatchSender,
    metrics: Arc<Metrics>,
    url: String,
    auth_token: Option<String>,
    liveness_backoff: Duration,
    session_id: Uuid,
}

impl StreamingClient {
    pub fn new(
        connection: Arc<dyn Connection>,
        url: impl Into<String>,
        dispatch_tx: DispatchSender,
    ) -> Self {
        Self {
            connection,
            dispatch_tx,
            metrics: Arc::new(Metrics::new()),
            url: url.into(),
            auth_token: None,
            liveness_backoff: DEFAULT_LIVENESS_BACKOFF,
            session_id: Uuid::new_v4(),
        }
    }

    /// Credential sent on the initial dial and every reconnect
    pub fn with_auth_token(mut self, auth_token: impl Into<String>) -> Self {
        self.auth_token = Some(auth_token.into());
        self
    }

    pub fn with_liveness_backoff(mut self, backoff: Duration) -> Self {
        self.liveness_backoff = backoff;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Run until `shutdown` fires.
    ///
    /// Fails immediately, before touching the network, when no
    /// authorization token was set. Every other fault is logged and
    /// absorbed.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let auth_token = match self.auth_token.as_deref() {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => {
                error!(url = %self.url, "Tried to start streaming client without auth token");
                return Err(ClientError::MissingAuthToken);
            }
        };

        let span = info_span!("streaming_client", session = %self.session_id);
        self.run_loop(auth_token, shutdown).instrument(span).await;
        Ok(())
    }

    async fn run_loop(&self, auth_token: String, shutdown: CancellationToken) {
        info!(url = %self.url, "Starting streaming client");

        // Closing from a second task is what unblocks a pending read
        {
            let connection = self.connection.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(
                async move {
                    shutdown.cancelled().await;
                    connection.close().await;
                }
                .in_current_span(),
            );
        }

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(url = %self.url, "Shutdown before connection was established");
                return;
            }
            dialed = self.connection.dial(&self.url, &auth_token) => {
                match dialed {
                    Ok(()) => {}
                    Err(e) if e.is_permanent() => {
                        error!(url = %self.url, error = %e, "Coordinator url or token is unusable");
                    }
                    // The connection layer keeps retrying on its own
                    Err(e) => warn!(url = %self.url, error = %e, "Initial dial failed"),
                }
            }
        }

        let mut was_connected = true;
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if !self.connection.is_connected() {
                if was_connected {
                    self.metrics.disconnect();
                    warn!(url = %self.url, state = %self.connection.state(), "Websocket disconnected");
                } else {
                    debug!(url = %self.url, "Still disconnected");
                }
                was_connected = false;

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.liveness_backoff) => continue,
                }
            }

            if !was_connected {
                info!(url = %self.url, "Websocket connected");
                was_connected = true;
            }

            let frame = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                frame = self.connection.read_frame() => frame,
            };

            match frame {
                Ok(frame) => self.route_frame(&frame, &shutdown).await,
                Err(ConnectionError::Closed) if shutdown.is_cancelled() => break,
                Err(e) => {
                    self.metrics.read_error();
                    warn!(url = %self.url, error = %e, "Error reading from websocket");
                }
            }
        }

        info!(url = %self.url, "Websocket closed");
    }

    /// Decode one frame and hand it to the right consumer
    pub async fn route_frame(&self, frame: &str, shutdown: &CancellationToken) {
        let request = match ClientRequest::from_json(frame) {
            Ok(request) => request,
            Err(e) => {
                self.metrics.read_error();
                warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        match request.into_command() {
            Ok(ServerCommand::Generate(item)) => {
                self.metrics.work_received();
                info!(
                    hash = %item.hash,
                    difficulty = item.difficulty_multiplier,
                    "Received work request"
                );
                let hash = item.hash.clone();
                self.dispatch(Dispatch::Work(item), &hash, shutdown).await;
            }
            Ok(ServerCommand::Cancel(hash)) => {
                debug!(hash = %hash, "Received cancel request");
                self.dispatch(Dispatch::Cancel(hash.clone()), &hash, shutdown)
                    .await;
            }
            Ok(ServerCommand::Unknown(request_type)) => {
                self.metrics.unknown_message();
                warn!(request_type = %request_type, "Received unknown message");
            }
            Err(e) => {
                self.metrics.work_rejected();
                warn!(error = %e, "Dropping invalid request");
            }
        }
    }

    async fn dispatch(&self, dispatch: Dispatch, hash: &str, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(hash = %hash, "Shutdown while dispatching");
            }
            sent = self.dispatch_tx.send(dispatch) => {
                if sent.is_err() {
                    warn!(hash = %hash, "Dispatch channel closed, dropping instruction");
                }
            }
        }
    }
}
