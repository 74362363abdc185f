//! End-to-end tests for the intake path
//!
//! These tests drive a running `StreamingClient` through `MockConnection`
//! with a live `WorkBroker` behind it, and verify:
//! 1. Valid work reaches the backlog
//! 2. Cancels remove pending work, even right behind the generate
//! 3. Invalid work never reaches the backlog
//! 4. Disconnects are survived and shutdown closes the connection

use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;
use workstream::client::{ClientError, StreamingClient};
use workstream::messaging::{Connection, ConnectionError, ConnectionState, MockConnection};
use workstream::observability::Metrics;
use workstream::proto::WorkItem;
use workstream::queue::{WorkBroker, WorkQueue, dispatch_channel};

const BACKOFF: Duration = Duration::from_millis(25);
const TOKEN: &str = "test-auth-token";

/// Test context holding all shared resources
struct E2EContext {
    connection: Arc<MockConnection>,
    queue: Arc<WorkQueue>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), ClientError>>,
    broker: JoinHandle<()>,
}

impl E2EContext {
    /// Start a client and broker against a fresh mock and wait until it has dialed
    async fn start() -> Self {
        let connection = Arc::new(MockConnection::new());
        let queue = Arc::new(WorkQueue::new());
        let metrics = Arc::new(Metrics::new());
        let (dispatch_tx, dispatch_rx) = dispatch_channel(16);
        let shutdown = CancellationToken::new();

        let client = StreamingClient::new(connection.clone(), "ws://mock/ws/worker", dispatch_tx)
            .with_auth_token(TOKEN)
            .with_liveness_backoff(BACKOFF)
            .with_metrics(metrics.clone());
        let handle = tokio::spawn(client.run(shutdown.clone()));

        // No workers: nothing pops, so the backlog shows exactly what the broker applied
        let broker = WorkBroker::new(queue.clone(), Arc::new(Notify::new()))
            .with_metrics(metrics.clone());
        let broker = tokio::spawn(broker.run(dispatch_rx, shutdown.clone()));

        let ctx = Self {
            connection,
            queue,
            metrics,
            shutdown,
            handle,
            broker,
        };

        let connection = ctx.connection.clone();
        wait_until(move || connection.is_connected()).await;
        ctx
    }

    async fn wait_pending(&self, hash: &str) {
        let queue = self.queue.clone();
        let hash = hash.to_string();
        wait_until(move || queue.exists(&hash)).await;
    }

    /// Push a marker generate and wait for it; everything sent earlier has been applied
    async fn flush(&self, marker: char) {
        self.connection.push_frame(generate_frame(&hash_of(marker), "1"));
        self.wait_pending(&hash_of(marker)).await;
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let result = timeout(Duration::from_secs(1), self.handle)
            .await
            .expect("run loop did not stop")
            .expect("run loop panicked");
        assert!(result.is_ok());
        timeout(Duration::from_secs(1), self.broker)
            .await
            .expect("broker did not stop")
            .expect("broker panicked");
    }
}

fn hash_of(c: char) -> String {
    std::iter::repeat(c).take(64).collect()
}

fn generate_frame(hash: &str, multiplier: &str) -> String {
    format!(
        r#"{{"request_type":"work_generate","hash":"{}","difficulty_multiplier":{}}}"#,
        hash, multiplier
    )
}

fn cancel_frame(hash: &str) -> String {
    format!(r#"{{"request_type":"work_cancel","hash":"{}"}}"#, hash)
}

async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_generate_reaches_backlog() {
    let ctx = E2EContext::start().await;
    let hash = hash_of('a');

    ctx.connection.push_frame(generate_frame(&hash, "1.5"));
    ctx.wait_pending(&hash).await;

    let item = ctx.queue.get(&hash).unwrap();
    assert_eq!(item.difficulty_multiplier, 1.5);
    assert_eq!(ctx.metrics.snapshot().work_received, 1);
    assert_eq!(ctx.connection.dial_tokens(), vec![TOKEN.to_string()]);
    ctx.stop().await;
}

#[tokio::test]
async fn test_cancel_before_pop_removes_work() {
    let ctx = E2EContext::start().await;
    let hash = hash_of('b');
    let other = hash_of('c');

    ctx.connection.push_frame(generate_frame(&hash, "2"));
    ctx.connection.push_frame(generate_frame(&other, "2"));
    ctx.wait_pending(&hash).await;
    ctx.wait_pending(&other).await;

    ctx.connection.push_frame(cancel_frame(&hash));

    let queue = ctx.queue.clone();
    let cancelled = hash.clone();
    wait_until(move || !queue.exists(&cancelled)).await;

    assert!(ctx.queue.exists(&other));
    assert_eq!(ctx.metrics.snapshot().work_cancelled, 1);
    ctx.stop().await;
}

#[tokio::test]
async fn test_cancel_right_behind_generate_removes_work() {
    let ctx = E2EContext::start().await;
    let hash = hash_of('9');

    // Both frames are buffered before the client reads either
    ctx.connection.push_frame(generate_frame(&hash, "1"));
    ctx.connection.push_frame(cancel_frame(&hash));
    ctx.flush('8').await;

    assert!(!ctx.queue.exists(&hash));
    assert_eq!(ctx.queue.len(), 1);
    assert_eq!(ctx.metrics.snapshot().work_cancelled, 1);
    ctx.stop().await;
}

#[tokio::test]
async fn test_cancel_after_pop_is_noop() {
    let ctx = E2EContext::start().await;
    let hash = hash_of('d');

    ctx.queue.put(WorkItem::new(hash.clone(), 1.0).unwrap());
    let claimed = ctx.queue.pop_random().unwrap();
    assert_eq!(claimed.hash, hash);

    ctx.connection.push_frame(cancel_frame(&hash));
    ctx.flush('7').await;

    assert!(!ctx.queue.exists(&hash));
    assert_eq!(ctx.queue.len(), 1);
    assert_eq!(ctx.metrics.snapshot().work_cancelled, 0);
    ctx.stop().await;
}

#[tokio::test]
async fn test_invalid_hash_never_queued() {
    let ctx = E2EContext::start().await;

    ctx.connection.push_frame(generate_frame(&"a".repeat(63), "1"));
    ctx.connection.push_frame(generate_frame(&"g".repeat(64), "1"));
    ctx.connection.push_frame(generate_frame(&hash_of('e'), "-1"));
    ctx.flush('6').await;

    assert_eq!(ctx.metrics.snapshot().work_rejected, 3);
    assert!(!ctx.queue.exists(&hash_of('e')));
    assert_eq!(ctx.queue.len(), 1);
    ctx.stop().await;
}

#[tokio::test]
async fn test_read_errors_do_not_stop_the_loop() {
    let ctx = E2EContext::start().await;

    ctx.connection
        .push_error(ConnectionError::ReadFailed("bad frame".to_string()));
    ctx.connection.push_frame("{ definitely not json");
    ctx.connection.push_frame(r#"{"request_type":"work_generate"}"#);
    ctx.connection.push_frame(generate_frame(&hash_of('f'), "4"));
    ctx.wait_pending(&hash_of('f')).await;

    let snapshot = ctx.metrics.snapshot();
    assert_eq!(snapshot.read_errors, 2);
    assert_eq!(snapshot.work_rejected, 1);
    assert_eq!(ctx.connection.state(), ConnectionState::Connected);
    ctx.stop().await;
}

#[tokio::test]
async fn test_survives_disconnect_and_routes_after_reconnect() {
    let ctx = E2EContext::start().await;

    ctx.connection.disconnect();
    tokio::time::sleep(BACKOFF * 4).await;

    assert!(!ctx.handle.is_finished());
    assert_eq!(ctx.metrics.snapshot().disconnects, 1);

    ctx.connection.reconnect();
    ctx.connection.push_frame(generate_frame(&hash_of('1'), "1"));
    ctx.wait_pending(&hash_of('1')).await;
    ctx.stop().await;
}

#[tokio::test]
async fn test_shutdown_while_blocked_on_read() {
    let ctx = E2EContext::start().await;
    let connection = ctx.connection.clone();

    // Let the loop park on read_frame
    tokio::time::sleep(Duration::from_millis(20)).await;
    ctx.shutdown.cancel();

    let result = timeout(BACKOFF * 2, ctx.handle)
        .await
        .expect("run loop did not return within one backoff interval")
        .unwrap();
    assert!(result.is_ok());

    wait_until(move || connection.close_calls() == 1).await;
    assert_eq!(ctx.connection.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_shutdown_while_disconnected() {
    let ctx = E2EContext::start().await;
    ctx.connection.disconnect();
    tokio::time::sleep(BACKOFF / 2).await;

    ctx.shutdown.cancel();
    timeout(BACKOFF * 2, ctx.handle)
        .await
        .expect("run loop did not return during backoff")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_missing_token_is_fatal() {
    let connection = Arc::new(MockConnection::new());
    let (dispatch_tx, _dispatch_rx) = dispatch_channel(1);

    let client = StreamingClient::new(connection.clone(), "ws://mock/ws/worker", dispatch_tx)
        .with_auth_token("");

    let result = client.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(ClientError::MissingAuthToken)));
    assert!(connection.dial_tokens().is_empty());
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}
