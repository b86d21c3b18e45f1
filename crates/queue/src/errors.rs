use thiserror::Error;

/// Queue operation errors.
///
/// Only structural failures (`QueueFull`, `Validation`, `InvalidConfig`)
/// surface synchronously to callers of the public API. Per-record failures
/// inside a drain never propagate out of
/// [`crate::SyncManager::process_queue`]; they are recorded on the
/// operation itself and reported through hooks and the drain summary.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Enqueue rejected because the queue is at `max_queue_size`. The
    /// caller must retry later or drop the operation; nothing is silently
    /// discarded.
    #[error("Queue is at maximum capacity ({0})")]
    QueueFull(usize),

    /// Payload rejected by a strategy's `validate` before it ever entered
    /// the queue.
    #[error("Payload validation failed for {key}: {reason}")]
    Validation {
        /// Registry key (`entity:operation_name`) of the rejecting strategy.
        key: String,
        /// Reason returned by the strategy.
        reason: String,
    },

    /// No strategy registered for a record's key. A programming error, not
    /// a transient fault; the record is failed immediately without retries.
    #[error("no strategy registered for {0}")]
    StrategyMissing(String),

    /// Failure reported by a strategy's `execute`.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Failure reading or writing the durable blob.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A shared-state lock was poisoned by a panicking holder.
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),
}

impl QueueError {
    /// Map a poisoned-lock error into `LockPoisoned` for use with `?`.
    pub fn lock(err: impl std::fmt::Display) -> Self {
        Self::LockPoisoned(err.to_string())
    }
}

/// Queue operation result type.
pub type QueueResult<T> = Result<T, QueueError>;
