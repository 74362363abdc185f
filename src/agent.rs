use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use workstream::client::StreamingClient;
use workstream::config::Config;
use workstream::messaging::{Connection, ReconnectingSocket};
use workstream::observability::Metrics;
use workstream::queue::{WorkBroker, WorkQueue, dispatch_channel};
use workstream::worker::{LogSolver, WorkerConfig, WorkerPool};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Wire client, broker and workers together and run until Ctrl+C / SIGTERM
pub async fn run(config: Config) -> Result<(), AnyError> {
    let shutdown = CancellationToken::new();
    let metrics = Arc::new(Metrics::new());
    let queue = Arc::new(WorkQueue::new());
    let notify = Arc::new(Notify::new());
    let (dispatch_tx, dispatch_rx) = dispatch_channel(config.workers.dispatch_capacity);

    let connection: Arc<dyn Connection> =
        Arc::new(ReconnectingSocket::from_config(&config.coordinator));

    let mut client = StreamingClient::new(connection, config.coordinator.url.clone(), dispatch_tx)
    .with_liveness_backoff(config.coordinator.liveness_backoff.as_duration())
    .with_metrics(metrics.clone());
    if let Some(token) = &config.coordinator.auth_token {
        client = client.with_auth_token(token.clone());
    }

    let pool = WorkerPool::spawn(
        &WorkerConfig::from(&config.workers),
        queue.clone(),
        notify.clone(),
        Arc::new(LogSolver),
        metrics.clone(),
        shutdown.clone(),
    );
    let broker = WorkBroker::new(queue, notify).with_metrics(metrics.clone());
    let broker = tokio::spawn(broker.run(dispatch_rx, shutdown.clone()));

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let result = client.run(shutdown.clone()).await;
    if let Err(e) = &result {
        error!(error = %e, "Streaming client refused to start");
        shutdown.cancel();
    }

    if let Err(e) = broker.await {
        error!(error = %e, "Work broker task panicked");
    }
    pool.join().await;

    info!(metrics = ?metrics.snapshot(), "Workstream stopped");
    result.map_err(Into::into)
}

/// Print the resolved configuration with the token masked
pub fn print_config(config: &Config) {
    // auth_token is skipped by serde
    match serde_json::to_string_pretty(config) {
        Ok(rendered) => println!("{}", rendered),
        Err(e) => error!(error = %e, "Failed to render configuration"),
    }

    let token = if config.coordinator.auth_token.is_some() {
        "set"
    } else {
        "missing"
    };
    println!("auth_token: {}", token);
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
