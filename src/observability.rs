//! Client counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    work_received: AtomicU64,
    work_rejected: AtomicU64,
    work_cancelled: AtomicU64,
    unknown_messages: AtomicU64,
    read_errors: AtomicU64,
    disconnects: AtomicU64,
    work_claimed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn work_received(&self) {
        self.work_received.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "work_received", "Metric incremented");
    }

    pub fn work_rejected(&self) {
        self.work_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "work_rejected", "Metric incremented");
    }

    pub fn work_cancelled(&self) {
        self.work_cancelled.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "work_cancelled", "Metric incremented");
    }

    pub fn unknown_message(&self) {
        self.unknown_messages.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "unknown_messages", "Metric incremented");
    }

    pub fn read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "read_errors", "Metric incremented");
    }

    pub fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "disconnects", "Metric incremented");
    }

    pub fn work_claimed(&self) {
        self.work_claimed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "work_claimed", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            work_received: self.work_received.load(Ordering::Relaxed),
            work_rejected: self.work_rejected.load(Ordering::Relaxed),
            work_cancelled: self.work_cancelled.load(Ordering::Relaxed),
            unknown_messages: self.unknown_messages.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            work_claimed: self.work_claimed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub work_received: u64,
    pub work_rejected: u64,
    pub work_cancelled: u64,
    pub unknown_messages: u64,
    pub read_errors: u64,
    pub disconnects: u64,
    pub work_claimed: u64,
}
