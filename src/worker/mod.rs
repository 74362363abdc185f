//! Local worker pool
//!
//! Workers claim backlog items with `WorkQueue::pop_random` and pass them
//! to a `WorkSolver`. Computing the proof is the solver's job.

pub mod runner;

pub use runner::{LogSolver, SolveError, WorkSolver, WorkerContext, run_worker};

use crate::config::WorkersConfig;
use crate::observability::Metrics;
use crate::queue::WorkQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workers: usize,
    pub poll_interval: Duration,
}

impl From<&WorkersConfig> for WorkerConfig {
    fn from(config: &WorkersConfig) -> Self {
        Self {
            workers: config.count,
            poll_interval: config.poll_interval.as_duration(),
        }
    }
}

/// Fixed-size set of workers draining one shared backlog
pub struct WorkerPool {
    tasks: JoinSet<()>,
}

impl WorkerPool {
    /// Spawn `config.workers` workers on the current runtime
    pub fn spawn(
        config: &WorkerConfig,
        queue: Arc<WorkQueue>,
        notify: Arc<Notify>,
        solver: Arc<dyn WorkSolver>,
        metrics: Arc<Metrics>,
        shutdown: CancellationToken,
    ) -> Self {
        info!(workers = config.workers, poll_interval = ?config.poll_interval, "Starting worker pool");

        let ctx = WorkerContext {
            queue,
            notify,
            solver,
            metrics,
            poll_interval: config.poll_interval,
        };

        let mut tasks = JoinSet::new();
        for worker_id in 0..config.workers {
            tasks.spawn(run_worker(worker_id, ctx.clone(), shutdown.clone()));
        }

        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every worker to exit
    pub async fn join(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }
}
