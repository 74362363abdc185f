//! Worker loop - claims backlog items and hands them to a solver

use crate::observability::Metrics;
use crate::proto::WorkItem;
use crate::queue::WorkQueue;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("Solver failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, SolveError>;

/// Boundary to the compute routine
///
/// Implementations produce the proof for `item` and report it out-of-band;
/// the worker only learns whether the attempt succeeded.
#[async_trait]
pub trait WorkSolver: Send + Sync {
    async fn solve(&self, item: WorkItem) -> Result<()>;
}

/// Solver that only records the claim (dry-run mode)
#[derive(Debug, Clone, Default)]
pub struct LogSolver;

#[async_trait]
impl WorkSolver for LogSolver {
    async fn solve(&self, item: WorkItem) -> Result<()> {
        info!(
            hash = %item.hash,
            difficulty = item.difficulty_multiplier,
            "Dry run: work claimed, no solver attached"
        );
        Ok(())
    }
}

/// Everything one worker needs, cloned per worker
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<WorkQueue>,
    pub notify: Arc<Notify>,
    pub solver: Arc<dyn WorkSolver>,
    pub metrics: Arc<Metrics>,
    pub poll_interval: Duration,
}

/// Drain the backlog until `shutdown` fires
///
/// `pop_random` never blocks, so an idle worker parks on the broker's
/// notify and re-polls every `poll_interval` in case a wake-up was missed.
pub async fn run_worker(worker_id: usize, ctx: WorkerContext, shutdown: CancellationToken) {
    debug!(worker_id, "Worker started");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let Some(item) = ctx.queue.pop_random() else {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ctx.notify.notified() => {}
                _ = tokio::time::sleep(ctx.poll_interval) => {}
            }
            continue;
        };

        ctx.metrics.work_claimed();
        let hash = item.hash.clone();
        debug!(worker_id, hash = %hash, remaining = ctx.queue.len(), "Work claimed");

        match ctx.solver.solve(item).await {
            Ok(()) => debug!(worker_id, hash = %hash, "Work finished"),
            Err(e) => warn!(worker_id, hash = %hash, error = %e, "Work failed"),
        }
    }

    debug!(worker_id, "Worker stopped");
}
