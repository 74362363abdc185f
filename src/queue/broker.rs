use crate::observability::Metrics;
use crate::proto::WorkItem;
use crate::queue::store::WorkQueue;
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One routed coordinator instruction, in wire order
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Fresh work for the backlog
    Work(WorkItem),
    /// Drop the pending item with this hash
    Cancel(String),
}

/// Sending half of the dispatch channel, held by the streaming client
pub type DispatchSender = mpsc::Sender<Dispatch>;

/// Receiving half of the dispatch channel, drained by the broker
pub type DispatchReceiver = mpsc::Receiver<Dispatch>;

/// Create the hand-off channel between the client and the worker side.
///
/// The channel is bounded: when workers fall behind, `send` waits and the
/// reader stops pulling frames off the socket.
pub fn dispatch_channel(capacity: usize) -> (DispatchSender, DispatchReceiver) {
    mpsc::channel(capacity)
}

/// WorkBroker applies dispatched instructions to the shared backlog
///
/// Architecture:
/// 1. Client decodes `work_generate` / `work_cancel` and sends a `Dispatch`
/// 2. Broker receives instructions one at a time, in the order they were read
/// 3. `Work` is put into the backlog and wakes one idle worker
/// 4. `Cancel` deletes the hash from the backlog
/// 5. Workers claim items with `queue.pop_random()`
///
/// Generate and cancel share one channel, so a cancel can never overtake
/// the put of the work it names. Only work a worker already popped escapes
/// a cancel.
pub struct WorkBroker {
    queue: Arc<WorkQueue>,
    notify: Arc<Notify>,
    metrics: Arc<Metrics>,
}

impl WorkBroker {
    pub fn new(queue: Arc<WorkQueue>, notify: Arc<Notify>) -> Self {
        Self {
            queue,
            notify,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Queue one item and wake a worker if it was new
    pub fn accept(&self, item: WorkItem) -> bool {
        let hash = item.hash.clone();
        if self.queue.put(item) {
            self.notify.notify_one();
            debug!(hash = %hash, "Work handed to backlog");
            true
        } else {
            false
        }
    }

    /// Remove pending work; a no-op when a worker already claimed it
    pub fn cancel(&self, hash: &str) -> bool {
        if self.queue.delete(hash) {
            self.metrics.work_cancelled();
            info!(hash = %hash, "Cancelled pending work");
            true
        } else {
            debug!(hash = %hash, "Cancel for work that is not pending");
            false
        }
    }

    fn apply(&self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Work(item) => {
                self.accept(item);
            }
            Dispatch::Cancel(hash) => {
                self.cancel(&hash);
            }
        }
    }

    /// Drain the dispatch channel until it closes or `shutdown` fires
    pub async fn run(self, mut dispatch_rx: DispatchReceiver, shutdown: CancellationToken) {
        info!("Work broker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Work broker shutting down");
                    break;
                }
                received = dispatch_rx.recv() => match received {
                    Some(dispatch) => self.apply(dispatch),
                    None => {
                        info!("Dispatch channel closed, work broker exiting");
                        break;
                    }
                },
            }
        }

        // Wake every parked worker so they observe shutdown promptly
        self.notify.notify_waiters();
    }
}
