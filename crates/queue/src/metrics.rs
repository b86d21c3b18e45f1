use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};

/// Queue metrics for monitoring.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    pub total_enqueued: AtomicU64,
    pub total_succeeded: AtomicU64,
    pub total_failed: AtomicU64,
    pub total_retried: AtomicU64,
    pub total_dead_lettered: AtomicU64,
    pub capacity_rejections: AtomicU64,
    pub validation_rejections: AtomicU64,
    pub persistence_failures: AtomicU64,
    pub drains_completed: AtomicU64,
    pub current_size: AtomicUsize,
}

impl QueueMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record enqueue operation
    pub fn record_enqueue(&self) {
        self.total_enqueued.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record a terminal success
    pub fn record_success(&self) {
        self.total_succeeded.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record a terminal failure (FAILED or no-strategy)
    pub fn record_failure(&self) {
        self.total_failed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record a failed attempt rescheduled for retry
    pub fn record_retry(&self) {
        self.total_retried.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record a dead-letter demotion
    pub fn record_dead_letter(&self) {
        self.total_dead_lettered.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record an enqueue rejected at capacity
    pub fn record_capacity_rejection(&self) {
        self.capacity_rejections.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record an enqueue rejected by payload validation
    pub fn record_validation_rejection(&self) {
        self.validation_rejections.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record a failed persistence attempt
    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record a completed drain pass
    pub fn record_drain(&self) {
        self.drains_completed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Update current queue size
    pub fn update_size(&self, size: usize) {
        self.current_size.store(size, AtomicOrdering::Relaxed);
    }

    /// Get a point-in-time snapshot of all counters
    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            total_enqueued: self.total_enqueued.load(AtomicOrdering::Relaxed),
            total_succeeded: self.total_succeeded.load(AtomicOrdering::Relaxed),
            total_failed: self.total_failed.load(AtomicOrdering::Relaxed),
            total_retried: self.total_retried.load(AtomicOrdering::Relaxed),
            total_dead_lettered: self.total_dead_lettered.load(AtomicOrdering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(AtomicOrdering::Relaxed),
            validation_rejections: self.validation_rejections.load(AtomicOrdering::Relaxed),
            persistence_failures: self.persistence_failures.load(AtomicOrdering::Relaxed),
            drains_completed: self.drains_completed.load(AtomicOrdering::Relaxed),
            current_size: self.current_size.load(AtomicOrdering::Relaxed),
        }
    }
}

/// Serializable metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetricsSnapshot {
    pub total_enqueued: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_retried: u64,
    pub total_dead_lettered: u64,
    pub capacity_rejections: u64,
    pub validation_rejections: u64,
    pub persistence_failures: u64,
    pub drains_completed: u64,
    pub current_size: usize,
}
