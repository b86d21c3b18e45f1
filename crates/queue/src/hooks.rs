//! Lifecycle observability hooks.
//!
//! Hooks are best-effort notifications: they carry no return value, and a
//! panicking observer is isolated so it can never abort a drain or corrupt
//! the state machine.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::errors::{QueueError, QueueResult};
use crate::types::{DrainSummary, OperationRecord};

/// Observer interface for queue lifecycle events.
///
/// All methods have empty defaults; implement only the events you care
/// about.
pub trait QueueHooks: Send + Sync {
    /// A record was enqueued and persisted.
    fn on_operation_added(&self, _record: &OperationRecord) {}

    /// A due record was claimed for one execution attempt.
    fn on_operation_started(&self, _record: &OperationRecord) {}

    /// A record reached `SUCCESS`.
    fn on_operation_success(&self, _record: &OperationRecord) {}

    /// An attempt failed; the record was rescheduled or marked `FAILED`.
    fn on_operation_failed(&self, _record: &OperationRecord) {}

    /// A record exhausted its retry budget and was quarantined.
    fn on_operation_dead_letter(&self, _record: &OperationRecord) {}

    /// A drain started over `due` eligible records.
    fn on_queue_processing_started(&self, _due: usize) {}

    /// A drain finished; `summary` carries the aggregate counts.
    fn on_queue_processing_completed(&self, _summary: &DrainSummary) {}
}

/// Registered observers. Adding hooks merges into the existing set rather
/// than replacing it, so independent subsystems can subscribe separately.
#[derive(Default)]
pub(crate) struct HookSet {
    observers: RwLock<Vec<Arc<dyn QueueHooks>>>,
}

impl HookSet {
    pub(crate) fn add(&self, hooks: Arc<dyn QueueHooks>) -> QueueResult<()> {
        let mut observers = self.observers.write().map_err(QueueError::lock)?;
        observers.push(hooks);
        Ok(())
    }

    /// Notify every observer, isolating panics per observer.
    pub(crate) fn emit(&self, event: impl Fn(&dyn QueueHooks)) {
        let observers = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(e) => {
                warn!("hook registry lock poisoned, skipping notifications: {e}");
                return;
            }
        };

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| event(observer.as_ref()))).is_err() {
                warn!("queue hook panicked; continuing");
            }
        }
    }
}
