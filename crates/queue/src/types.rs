use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Mutation class of an operation.
///
/// Inferred from the operation name at enqueue time
/// (`create_*`/`add_*` → `Create`, `delete_*`/`remove_*` → `Delete`,
/// everything else → `Update`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Infer the mutation class from an operation name.
    pub fn infer(operation_name: &str) -> Self {
        let name = operation_name.to_ascii_lowercase();
        if name.starts_with("create") || name.starts_with("add") || name.starts_with("insert") {
            Self::Create
        } else if name.starts_with("delete") || name.starts_with("remove") {
            Self::Delete
        } else {
            Self::Update
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Lifecycle status of an operation record.
///
/// `Success`, `Failed` and `DeadLetter` are terminal for automatic
/// processing; only [`crate::SyncManager::retry_failed_operations`] moves a
/// record out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Processing,
    Success,
    Failed,
    DeadLetter,
}

impl OperationStatus {
    /// Whether automatic processing is finished with this record.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::DeadLetter)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
            Self::DeadLetter => write!(f, "DEAD_LETTER"),
        }
    }
}

/// Metadata key carrying the creation timestamp, always present.
pub const METADATA_TIMESTAMP_KEY: &str = "timestamp";

/// One durable unit of work.
///
/// Records are created by enqueue, mutated only by the drain loop or the
/// explicit manual recovery operations, and removed only when completed
/// records are cleared. All timestamps are milliseconds since the Unix
/// epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub kind: OperationKind,
    pub entity: String,
    pub operation_name: String,
    pub payload: Value,
    pub metadata: HashMap<String, Value>,
    pub status: OperationStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: u64,
    pub updated_at: u64,
    /// Earliest moment the record becomes due again; absent means
    /// eligible immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl OperationRecord {
    /// Create a new pending record.
    ///
    /// `max_retries` is copied from the queue configuration at enqueue time
    /// so later config changes never retroactively alter in-flight records.
    pub fn new(
        entity: impl Into<String>,
        operation_name: impl Into<String>,
        payload: Value,
        mut metadata: HashMap<String, Value>,
        max_retries: u32,
        now: u64,
    ) -> Self {
        let operation_name = operation_name.into();
        metadata.entry(METADATA_TIMESTAMP_KEY.to_string()).or_insert_with(|| Value::from(now));

        Self {
            id: Uuid::new_v4().to_string(),
            kind: OperationKind::infer(&operation_name),
            entity: entity.into(),
            operation_name,
            payload,
            metadata,
            status: OperationStatus::Pending,
            retry_count: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            next_retry_at: None,
            last_error: None,
        }
    }

    /// Registry key for this record, `entity:operation_name`.
    pub fn strategy_key(&self) -> String {
        format!("{}:{}", self.entity, self.operation_name)
    }

    /// Whether a pending record is eligible for processing at `now`.
    pub fn is_due(&self, now: u64) -> bool {
        self.status == OperationStatus::Pending
            && self.next_retry_at.map_or(true, |at| now >= at)
    }

    /// Claim the record for one execution attempt.
    pub fn mark_processing(&mut self, now: u64) {
        self.status = OperationStatus::Processing;
        self.touch(now);
    }

    /// Terminal success transition.
    pub fn mark_success(&mut self, now: u64) {
        self.status = OperationStatus::Success;
        self.next_retry_at = None;
        self.last_error = None;
        self.touch(now);
    }

    /// Record one failed attempt: bump the retry counter and keep the
    /// failure message for dead-letter review.
    pub fn record_failure(&mut self, error: impl Into<String>, now: u64) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.touch(now);
    }

    /// Return the record to `Pending` with a scheduled retry time.
    pub fn schedule_retry(&mut self, next_retry_at: u64, now: u64) {
        self.status = OperationStatus::Pending;
        self.next_retry_at = Some(next_retry_at);
        self.touch(now);
    }

    /// Terminal failure transition.
    pub fn mark_failed(&mut self, now: u64) {
        self.status = OperationStatus::Failed;
        self.next_retry_at = None;
        self.touch(now);
    }

    /// Terminal dead-letter transition.
    pub fn mark_dead_letter(&mut self, now: u64) {
        self.status = OperationStatus::DeadLetter;
        self.next_retry_at = None;
        self.touch(now);
    }

    /// Manual recovery: reset a terminal-failed record to a fresh pending
    /// state with a zeroed retry budget.
    pub fn reset_for_retry(&mut self, now: u64) {
        self.status = OperationStatus::Pending;
        self.retry_count = 0;
        self.next_retry_at = None;
        self.last_error = None;
        self.touch(now);
    }

    /// Whether the retry budget is exhausted.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    fn touch(&mut self, now: u64) {
        // updated_at is monotonically non-decreasing even if the clock
        // moves backwards between attempts.
        self.updated_at = self.updated_at.max(now);
    }
}

/// Queue configuration, immutable for the manager's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Retry ceiling copied onto each record at enqueue time.
    pub max_retries: u32,
    /// First-retry delay.
    pub base_retry_delay: Duration,
    /// Upper bound on the computed backoff delay.
    pub max_retry_delay: Duration,
    /// Exponential growth factor between consecutive retries.
    pub retry_multiplier: u32,
    /// When disabled, exhausted records go to `Failed` instead of
    /// `DeadLetter`.
    pub dead_letter_enabled: bool,
    /// Enqueue past this limit fails closed with `QueueError::QueueFull`.
    pub max_queue_size: usize,
    /// Well-known blob-store key holding the serialized queue.
    pub storage_key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            retry_multiplier: 2,
            dead_letter_enabled: true,
            max_queue_size: 1_000,
            storage_key: "offline_operation_queue".to_string(),
        }
    }
}

impl QueueConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_queue_size == 0 {
            return Err("Max queue size must be greater than 0".to_string());
        }

        if self.base_retry_delay.as_millis() == 0 {
            return Err("Base retry delay must be greater than 0".to_string());
        }

        if self.max_retry_delay < self.base_retry_delay {
            return Err("Max retry delay must be at least the base retry delay".to_string());
        }

        if self.retry_multiplier == 0 {
            return Err("Retry multiplier must be at least 1".to_string());
        }

        if self.storage_key.is_empty() {
            return Err("Storage key must not be empty".to_string());
        }

        Ok(())
    }
}

/// Point-in-time view of queue health for application polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Populated by an external network-awareness collaborator, never
    /// computed internally.
    pub is_online: bool,
    pub is_processing: bool,
    pub pending_count: usize,
    /// `FAILED` plus `DEAD_LETTER` records.
    pub failed_count: usize,
    /// Max `updated_at` among `SUCCESS` records.
    pub last_sync_at: Option<u64>,
}

/// Aggregate counts for one completed drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainSummary {
    /// Due records picked up by this drain.
    pub processed: usize,
    pub succeeded: usize,
    /// Failed attempts, including those rescheduled for retry.
    pub failed: usize,
    pub dead_lettered: usize,
}
