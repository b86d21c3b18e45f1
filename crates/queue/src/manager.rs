//! Manager lifecycle, enqueue, and the drain loop.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::backoff;
use crate::errors::{QueueError, QueueResult};
use crate::hooks::{HookSet, QueueHooks};
use crate::metrics::{QueueMetrics, QueueMetricsSnapshot};
use crate::storage::{BlobStore, MemoryStore, QueueStore};
use crate::strategy::{strategy_key, ExecutionOutcome, StrategyRegistry, SyncStrategy};
use crate::time::{Clock, SystemClock};
use crate::types::{
    DrainSummary, OperationRecord, OperationStatus, QueueConfig, SyncStatus,
};

/// Offline-first operation queue manager.
///
/// Owns the in-memory queue exclusively; external code never mutates a
/// record directly, only through this API. The persisted blob is the
/// single source of truth across restarts: it is loaded once at
/// construction and written back after each enqueue and each drain.
///
/// ## Concurrency
///
/// The manager has no internal timer or background task; drains are
/// triggered externally (on reconnect, periodically, or on demand) and run
/// to completion as one logical unit of work. Concurrent callers of
/// [`Self::process_queue`] are coalesced onto the single in-flight drain,
/// so no two drains ever run concurrently and per-record transitions are
/// race-free without per-record locks.
///
/// ## Error handling
///
/// Public methods return [`QueueResult`] and propagate with `?`. Lock
/// poisoning becomes [`QueueError::LockPoisoned`] instead of panicking.
/// Persistence failures after a successful in-memory mutation are logged
/// and absorbed: the mutation stands and is written out by the next
/// successful save.
pub struct SyncManager {
    state: RwLock<Vec<OperationRecord>>,
    registry: StrategyRegistry,
    hooks: HookSet,
    config: QueueConfig,
    store: QueueStore,
    clock: Arc<dyn Clock>,
    metrics: Arc<QueueMetrics>,
    online: AtomicBool,
    processing: AtomicBool,
    drain_gate: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager").finish_non_exhaustive()
    }
}

/// Builder for [`SyncManager`].
pub struct SyncManagerBuilder {
    config: QueueConfig,
    store: Option<Arc<dyn BlobStore>>,
    clock: Arc<dyn Clock>,
}

impl SyncManagerBuilder {
    fn new() -> Self {
        Self { config: QueueConfig::default(), store: None, clock: Arc::new(SystemClock) }
    }

    /// Use a custom queue configuration.
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist into `store`. Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Read time from `clock`. Defaults to the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration, load any persisted queue, and build the
    /// manager. A load failure degrades to an empty queue.
    pub async fn build(self) -> QueueResult<SyncManager> {
        self.config.validate().map_err(QueueError::InvalidConfig)?;

        let blob_store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let store = QueueStore::new(blob_store, self.config.storage_key.clone());
        let records = store.load().await;

        let metrics = Arc::new(QueueMetrics::new());
        metrics.update_size(records.len());

        Ok(SyncManager {
            state: RwLock::new(records),
            registry: StrategyRegistry::new(),
            hooks: HookSet::default(),
            config: self.config,
            store,
            clock: self.clock,
            metrics,
            online: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            drain_gate: tokio::sync::Mutex::new(()),
        })
    }
}

impl SyncManager {
    /// Start building a manager.
    pub fn builder() -> SyncManagerBuilder {
        SyncManagerBuilder::new()
    }

    /// Build a manager with default configuration over `store`.
    pub async fn new(store: Arc<dyn BlobStore>) -> QueueResult<Self> {
        Self::builder().store(store).build().await
    }

    /// Register a sync strategy (last write wins per key).
    pub fn register_strategy(&self, strategy: Arc<dyn SyncStrategy>) -> QueueResult<()> {
        self.registry.register(strategy)
    }

    /// Subscribe lifecycle hooks. Merges into the existing observer set
    /// rather than replacing it.
    pub fn add_hooks(&self, hooks: Arc<dyn QueueHooks>) -> QueueResult<()> {
        self.hooks.add(hooks)
    }

    /// Record the connectivity state reported by an external
    /// network-awareness collaborator. Never computed internally.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, AtomicOrdering::Relaxed);
    }

    /// Enqueue one operation and persist the queue.
    ///
    /// Fails closed with [`QueueError::QueueFull`] at capacity and
    /// [`QueueError::Validation`] when the registered strategy rejects the
    /// payload; in both cases nothing enters the queue. Returns the new
    /// record's id.
    #[instrument(skip(self, payload, metadata), fields(entity = %entity, operation = %operation_name))]
    pub async fn add_operation(
        &self,
        entity: &str,
        operation_name: &str,
        payload: Value,
        metadata: Option<HashMap<String, Value>>,
    ) -> QueueResult<String> {
        // Invalid payloads never enter the queue. Validation is user code
        // and runs outside the state lock so a panicking validator cannot
        // poison it.
        if let Some(strategy) = self.registry.lookup(entity, operation_name)? {
            let verdict = catch_unwind(AssertUnwindSafe(|| strategy.validate(&payload)))
                .unwrap_or_else(|_| Err("validation panicked".to_string()));
            if let Err(reason) = verdict {
                self.metrics.record_validation_rejection();
                return Err(QueueError::Validation {
                    key: strategy_key(entity, operation_name),
                    reason,
                });
            }
        }

        let (record, snapshot) = {
            let mut records = self.state.write().map_err(QueueError::lock)?;

            if records.len() >= self.config.max_queue_size {
                self.metrics.record_capacity_rejection();
                return Err(QueueError::QueueFull(self.config.max_queue_size));
            }

            let record = OperationRecord::new(
                entity,
                operation_name,
                payload,
                metadata.unwrap_or_default(),
                self.config.max_retries,
                self.clock.now_millis(),
            );
            records.push(record.clone());
            self.metrics.record_enqueue();
            self.metrics.update_size(records.len());
            (record, records.clone())
        };

        self.persist(&snapshot).await;
        self.hooks.emit(|h| h.on_operation_added(&record));
        debug!(id = %record.id, "operation enqueued");
        Ok(record.id)
    }

    /// Drain all currently-due pending operations.
    ///
    /// Idempotent under concurrency: if a drain is already in flight, the
    /// call awaits its completion instead of starting a second pass and
    /// returns an empty summary (the owning drain reports the real counts
    /// through the completion hook).
    #[instrument(skip(self))]
    pub async fn process_queue(&self) -> QueueResult<DrainSummary> {
        let Ok(_guard) = self.drain_gate.try_lock() else {
            debug!("drain already in flight, awaiting completion");
            let _completed = self.drain_gate.lock().await;
            return Ok(DrainSummary::default());
        };

        let _processing = ProcessingGuard::engage(&self.processing);
        self.drain().await
    }

    async fn drain(&self) -> QueueResult<DrainSummary> {
        let now = self.clock.now_millis();
        let due: Vec<String> = {
            let records = self.state.read().map_err(QueueError::lock)?;
            records.iter().filter(|r| r.is_due(now)).map(|r| r.id.clone()).collect()
        };

        if due.is_empty() {
            debug!("no due operations");
            return Ok(DrainSummary::default());
        }

        info!(due = due.len(), "draining sync queue");
        self.hooks.emit(|h| h.on_queue_processing_started(due.len()));

        let mut summary = DrainSummary::default();
        for id in &due {
            // Sequential by design: strategies may have ordering
            // expectations within an entity, and one record's failure must
            // not abort the rest of the drain.
            self.process_one(id, &mut summary).await?;
        }

        let snapshot = {
            let records = self.state.read().map_err(QueueError::lock)?;
            records.clone()
        };
        self.persist(&snapshot).await;

        self.metrics.record_drain();
        self.hooks.emit(|h| h.on_queue_processing_completed(&summary));
        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            dead_lettered = summary.dead_lettered,
            "drain complete"
        );
        Ok(summary)
    }

    /// Process a single claimed record through its strategy.
    async fn process_one(&self, id: &str, summary: &mut DrainSummary) -> QueueResult<()> {
        // Claim: only records still pending are picked up; anything
        // cleared or reset since the due snapshot is skipped.
        let Some(claimed) = self.claim(id)? else {
            return Ok(());
        };
        summary.processed += 1;
        self.hooks.emit(|h| h.on_operation_started(&claimed));

        let Some(strategy) =
            self.registry.lookup(&claimed.entity, &claimed.operation_name)?
        else {
            // A programming error, not a transient fault: retrying cannot
            // help, so fail immediately and loudly.
            let message =
                QueueError::StrategyMissing(claimed.strategy_key()).to_string();
            warn!(id = %claimed.id, key = %claimed.strategy_key(), "{message}");
            let failed = self.with_record(id, |record| {
                record.last_error = Some(message.clone());
                record.mark_failed(self.clock.now_millis());
            })?;
            summary.failed += 1;
            self.metrics.record_failure();
            if let Some(failed) = failed {
                self.hooks.emit(|h| h.on_operation_failed(&failed));
            }
            return Ok(());
        };

        // Transform applies immediately before execution, never at enqueue
        // time; the stored payload stays untouched. Strategy code is user
        // code: a panic in transform or execute is normalized into a failed
        // attempt instead of unwinding out of the drain and stranding the
        // record in PROCESSING.
        let outcome = match catch_unwind(AssertUnwindSafe(|| {
            let mut record = claimed.clone();
            record.payload = strategy.transform(record.payload);
            record
        })) {
            Ok(exec_record) => {
                let strategy = Arc::clone(&strategy);
                let attempt =
                    tokio::spawn(async move { strategy.execute(&exec_record).await });
                match attempt.await {
                    Ok(outcome) => outcome,
                    Err(join_error) => ExecutionOutcome::failure(format!(
                        "strategy execution panicked: {join_error}"
                    )),
                }
            }
            Err(_) => ExecutionOutcome::failure("strategy transform panicked"),
        };

        let now = self.clock.now_millis();
        if outcome.success {
            let updated = self.with_record(id, |record| record.mark_success(now))?;
            summary.succeeded += 1;
            self.metrics.record_success();
            if let Some(updated) = updated {
                debug!(id = %updated.id, "operation succeeded");
                self.hooks.emit(|h| h.on_operation_success(&updated));
            }
            return Ok(());
        }

        // Normalize whatever the strategy reported into the record's
        // last_error for diagnostics and dead-letter review.
        let error = QueueError::Execution(
            outcome.error.unwrap_or_else(|| "unspecified strategy error".to_string()),
        )
        .to_string();
        let dead_letter_enabled = self.config.dead_letter_enabled;
        let config = &self.config;
        let updated = self.with_record(id, |record| {
            record.record_failure(error.clone(), now);
            if record.retries_exhausted() {
                if dead_letter_enabled {
                    record.mark_dead_letter(now);
                } else {
                    record.mark_failed(now);
                }
            } else {
                let next = backoff::next_retry_at(config, record.retry_count, now);
                record.schedule_retry(next, now);
            }
        })?;

        let Some(updated) = updated else { return Ok(()) };
        match updated.status {
            OperationStatus::DeadLetter => {
                warn!(
                    id = %updated.id,
                    retries = updated.retry_count,
                    "operation dead-lettered"
                );
                summary.dead_lettered += 1;
                self.metrics.record_dead_letter();
                self.hooks.emit(|h| h.on_operation_dead_letter(&updated));
            }
            OperationStatus::Failed => {
                warn!(
                    id = %updated.id,
                    retries = updated.retry_count,
                    "operation failed permanently"
                );
                summary.failed += 1;
                self.metrics.record_failure();
                self.hooks.emit(|h| h.on_operation_failed(&updated));
            }
            _ => {
                debug!(
                    id = %updated.id,
                    retry = updated.retry_count,
                    next_retry_at = ?updated.next_retry_at,
                    "operation scheduled for retry"
                );
                summary.failed += 1;
                self.metrics.record_retry();
                self.hooks.emit(|h| h.on_operation_failed(&updated));
            }
        }
        Ok(())
    }

    /// Reset every `FAILED` and `DEAD_LETTER` record to a fresh pending
    /// state, persist, and immediately trigger a drain.
    #[instrument(skip(self))]
    pub async fn retry_failed_operations(&self) -> QueueResult<DrainSummary> {
        let now = self.clock.now_millis();
        let (snapshot, reset) = {
            let mut records = self.state.write().map_err(QueueError::lock)?;
            let mut reset = 0;
            for record in records.iter_mut().filter(|r| {
                matches!(r.status, OperationStatus::Failed | OperationStatus::DeadLetter)
            }) {
                record.reset_for_retry(now);
                reset += 1;
            }
            (records.clone(), reset)
        };

        if reset > 0 {
            info!(reset, "reset failed operations for retry");
            self.persist(&snapshot).await;
        }

        self.process_queue().await
    }

    /// Remove all `SUCCESS` records from the queue and persist. Failed and
    /// dead-letter records stay inspectable until explicitly retried.
    #[instrument(skip(self))]
    pub async fn clear_completed_operations(&self) -> QueueResult<usize> {
        let (snapshot, removed) = {
            let mut records = self.state.write().map_err(QueueError::lock)?;
            let before = records.len();
            records.retain(|r| r.status != OperationStatus::Success);
            self.metrics.update_size(records.len());
            (records.clone(), before - records.len())
        };

        if removed > 0 {
            info!(removed, "cleared completed operations");
            self.persist(&snapshot).await;
        }
        Ok(removed)
    }

    /// Point-in-time queue health snapshot.
    pub fn get_sync_status(&self) -> QueueResult<SyncStatus> {
        let records = self.state.read().map_err(QueueError::lock)?;
        Ok(SyncStatus {
            is_online: self.online.load(AtomicOrdering::Relaxed),
            is_processing: self.processing.load(AtomicOrdering::SeqCst),
            pending_count: records
                .iter()
                .filter(|r| r.status == OperationStatus::Pending)
                .count(),
            failed_count: records
                .iter()
                .filter(|r| {
                    matches!(
                        r.status,
                        OperationStatus::Failed | OperationStatus::DeadLetter
                    )
                })
                .count(),
            last_sync_at: records
                .iter()
                .filter(|r| r.status == OperationStatus::Success)
                .map(|r| r.updated_at)
                .max(),
        })
    }

    /// Read-only snapshot of the queue, optionally filtered by status.
    pub fn get_operations(
        &self,
        status: Option<OperationStatus>,
    ) -> QueueResult<Vec<OperationRecord>> {
        let records = self.state.read().map_err(QueueError::lock)?;
        Ok(records
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect())
    }

    /// Number of records currently in the queue.
    pub fn len(&self) -> usize {
        self.state.read().map(|records| records.len()).unwrap_or(0)
    }

    /// Whether the queue holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Claim a pending record for one execution attempt.
    fn claim(&self, id: &str) -> QueueResult<Option<OperationRecord>> {
        let now = self.clock.now_millis();
        let mut records = self.state.write().map_err(QueueError::lock)?;
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        if record.status != OperationStatus::Pending {
            return Ok(None);
        }
        record.mark_processing(now);
        Ok(Some(record.clone()))
    }

    /// Mutate one record under the write lock, returning the updated copy.
    fn with_record(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut OperationRecord),
    ) -> QueueResult<Option<OperationRecord>> {
        let mut records = self.state.write().map_err(QueueError::lock)?;
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        mutate(record);
        Ok(Some(record.clone()))
    }

    /// Persist the full queue. Save failures are logged and absorbed: the
    /// in-memory mutation stands and is written out by the next successful
    /// save.
    async fn persist(&self, records: &[OperationRecord]) {
        let now = self.clock.now_millis();
        if let Err(e) = self.store.save(records, now).await {
            self.metrics.record_persistence_failure();
            error!("failed to persist queue: {e}");
        }
    }
}

/// Raises the `is_processing` flag for the duration of a drain and clears
/// it on drop, including on early `?` returns and unwinds.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn engage(flag: &'a AtomicBool) -> Self {
        flag.store(true, AtomicOrdering::SeqCst);
        Self(flag)
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, AtomicOrdering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the manager facade. End-to-end drain behavior is
    //! covered by the integration suite.
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::time::MockClock;

    struct RejectingStrategy;

    #[async_trait]
    impl SyncStrategy for RejectingStrategy {
        fn entity(&self) -> &str {
            "club"
        }

        fn operation_name(&self) -> &str {
            "join"
        }

        fn validate(&self, payload: &Value) -> Result<(), String> {
            if payload.get("clubId").is_some() {
                Ok(())
            } else {
                Err("missing clubId".to_string())
            }
        }

        async fn execute(&self, _record: &OperationRecord) -> ExecutionOutcome {
            ExecutionOutcome::ok()
        }
    }

    async fn manager() -> SyncManager {
        SyncManager::builder()
            .clock(Arc::new(MockClock::at(1_000)))
            .build()
            .await
            .unwrap()
    }

    /// Enqueue returns a stable id and stores a pending record with the
    /// configured retry ceiling.
    #[tokio::test]
    async fn test_add_operation_creates_pending_record() {
        let manager = manager().await;
        let id = manager
            .add_operation("club", "join", json!({ "clubId": "c1" }), None)
            .await
            .unwrap();

        let operations = manager.get_operations(None).unwrap();
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].id, id);
        assert_eq!(operations[0].status, OperationStatus::Pending);
        assert_eq!(operations[0].max_retries, QueueConfig::default().max_retries);
    }

    /// Validates both enqueue rejection paths, payload validation and
    /// capacity, with no partial state change in either case.
    #[tokio::test]
    async fn test_add_operation_rejections() {
        let config = QueueConfig { max_queue_size: 2, ..QueueConfig::default() };
        let manager = SyncManager::builder()
            .config(config)
            .clock(Arc::new(MockClock::at(1_000)))
            .build()
            .await
            .unwrap();
        manager.register_strategy(Arc::new(RejectingStrategy)).unwrap();

        let err = manager
            .add_operation("club", "join", json!({ "userId": "u1" }), None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Validation { .. }));
        assert!(manager.is_empty());

        manager.add_operation("club", "join", json!({ "clubId": "c1" }), None).await.unwrap();
        manager.add_operation("club", "join", json!({ "clubId": "c2" }), None).await.unwrap();

        let err = manager
            .add_operation("club", "join", json!({ "clubId": "c3" }), None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::QueueFull(2)));
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.metrics().capacity_rejections, 1);
        assert_eq!(manager.metrics().validation_rejections, 1);
    }

    /// A panicking validator is contained: enqueue fails with a validation
    /// error, the state lock stays healthy, and later enqueues succeed.
    #[tokio::test]
    async fn test_panicking_validator_is_contained() {
        struct PanickingValidator;

        #[async_trait]
        impl SyncStrategy for PanickingValidator {
            fn entity(&self) -> &str {
                "club"
            }

            fn operation_name(&self) -> &str {
                "join"
            }

            fn validate(&self, _payload: &Value) -> Result<(), String> {
                panic!("validator bug");
            }

            async fn execute(&self, _record: &OperationRecord) -> ExecutionOutcome {
                ExecutionOutcome::ok()
            }
        }

        let manager = manager().await;
        manager.register_strategy(Arc::new(PanickingValidator)).unwrap();

        let err =
            manager.add_operation("club", "join", json!({}), None).await.unwrap_err();
        assert!(matches!(err, QueueError::Validation { .. }));
        assert!(manager.is_empty());
        assert_eq!(manager.metrics().validation_rejections, 1);

        manager.add_operation("profile", "update", json!({}), None).await.unwrap();
        assert_eq!(manager.len(), 1);
    }

    /// An invalid configuration is rejected at build time.
    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let config = QueueConfig { max_queue_size: 0, ..QueueConfig::default() };
        let err = SyncManager::builder().config(config).build().await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidConfig(_)));
    }

    /// Status snapshot reflects the externally supplied online flag and
    /// current record counts.
    #[tokio::test]
    async fn test_sync_status_snapshot() {
        let manager = manager().await;
        let status = manager.get_sync_status().unwrap();
        assert!(!status.is_online);
        assert!(!status.is_processing);
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.failed_count, 0);
        assert_eq!(status.last_sync_at, None);

        manager.set_online(true);
        manager.add_operation("club", "join", json!({ "clubId": "c1" }), None).await.unwrap();

        let status = manager.get_sync_status().unwrap();
        assert!(status.is_online);
        assert_eq!(status.pending_count, 1);
    }
}
