//! Offline-first operation queue.
//!
//! Lets a client application keep working while disconnected from its
//! remote system of record, then reconciles every locally-originated
//! mutation with that remote once connectivity returns. The engine
//! provides durable enqueue, pluggable per-operation sync strategies,
//! scheduled retry with exponential backoff, dead-letter quarantine, and
//! coalesced drain coordination.
//!
//! Delivery to a strategy's `execute` is at-least-once, never
//! exactly-once: strategies (or the remote system) must be idempotent.
//! The queue is single-process and has no internal timer; drains are
//! triggered externally and eligibility is evaluated lazily from each
//! record's `next_retry_at`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use opqueue::{
//!     ExecutionOutcome, FileStore, OperationRecord, SyncManager, SyncStrategy,
//! };
//! use serde_json::json;
//!
//! struct JoinClub;
//!
//! #[async_trait]
//! impl SyncStrategy for JoinClub {
//!     fn entity(&self) -> &str {
//!         "club"
//!     }
//!
//!     fn operation_name(&self) -> &str {
//!         "join"
//!     }
//!
//!     async fn execute(&self, _record: &OperationRecord) -> ExecutionOutcome {
//!         // Perform the remote call here; must be idempotent.
//!         ExecutionOutcome::ok()
//!     }
//! }
//!
//! # async fn run() -> opqueue::QueueResult<()> {
//! let manager = SyncManager::new(Arc::new(FileStore::new("./queue"))).await?;
//! manager.register_strategy(Arc::new(JoinClub))?;
//!
//! manager
//!     .add_operation("club", "join", json!({ "clubId": "c1", "userId": "u1" }), None)
//!     .await?;
//!
//! // Triggered on reconnect, periodically, or on demand.
//! manager.process_queue().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod backoff;
mod errors;
mod hooks;
mod manager;
pub mod metrics;
mod storage;
mod strategy;
mod time;
mod types;

pub use self::errors::{QueueError, QueueResult};
pub use self::hooks::QueueHooks;
pub use self::manager::{SyncManager, SyncManagerBuilder};
pub use self::metrics::{QueueMetrics, QueueMetricsSnapshot};
pub use self::storage::{BlobStore, FileStore, MemoryStore, QueueStore};
pub use self::strategy::{strategy_key, ExecutionOutcome, StrategyRegistry, SyncStrategy};
pub use self::time::{Clock, MockClock, SystemClock};
pub use self::types::{
    DrainSummary, OperationKind, OperationRecord, OperationStatus, QueueConfig, SyncStatus,
    METADATA_TIMESTAMP_KEY,
};
