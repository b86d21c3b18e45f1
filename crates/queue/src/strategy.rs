//! Pluggable per-operation sync strategies and their registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::errors::{QueueError, QueueResult};
use crate::types::OperationRecord;

/// Result of one `execute` attempt against the remote system.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    /// Whether the remote effect was applied.
    pub success: bool,
    /// Optional server response data (e.g. a server-resolved id).
    pub data: Option<Value>,
    /// Failure message, recorded on the operation as `last_error`.
    pub error: Option<String>,
}

impl ExecutionOutcome {
    /// Successful attempt without response data.
    pub fn ok() -> Self {
        Self { success: true, data: None, error: None }
    }

    /// Successful attempt carrying server response data.
    pub fn ok_with(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    /// Failed attempt. Strategies must catch their own transport errors
    /// and normalize them into this form; a failure here is retried with
    /// backoff rather than aborting the drain.
    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()) }
    }
}

/// Stateless behavior descriptor for one `(entity, operation_name)` pair.
///
/// `execute` must be safe to invoke more than once for the same logical
/// operation: the queue guarantees at-least-once delivery, not
/// exactly-once.
#[async_trait]
pub trait SyncStrategy: Send + Sync {
    /// Entity this strategy applies to (e.g. `club`).
    fn entity(&self) -> &str;

    /// Operation name this strategy applies to (e.g. `join`).
    fn operation_name(&self) -> &str;

    /// Reject malformed payloads at enqueue time, before the record is
    /// persisted. Default accepts everything.
    fn validate(&self, _payload: &Value) -> Result<(), String> {
        Ok(())
    }

    /// Last-moment payload enrichment, applied immediately before each
    /// execution attempt (never at enqueue time). Default is identity.
    fn transform(&self, payload: Value) -> Value {
        payload
    }

    /// Perform the remote effect for one attempt.
    async fn execute(&self, record: &OperationRecord) -> ExecutionOutcome;
}

/// Registry key for an `(entity, operation_name)` pair.
pub fn strategy_key(entity: &str, operation_name: &str) -> String {
    format!("{entity}:{operation_name}")
}

/// Maps `entity:operation_name` keys to registered strategies.
///
/// Pure map with no side effects. Registration is last-write-wins, which
/// supports hot-reloading a strategy during development.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: RwLock<HashMap<String, Arc<dyn SyncStrategy>>>,
}

impl StrategyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy, replacing any prior registration for the same
    /// key.
    pub fn register(&self, strategy: Arc<dyn SyncStrategy>) -> QueueResult<()> {
        let key = strategy_key(strategy.entity(), strategy.operation_name());
        let mut strategies = self.strategies.write().map_err(QueueError::lock)?;
        if strategies.insert(key.clone(), strategy).is_some() {
            debug!(%key, "replaced existing strategy registration");
        }
        Ok(())
    }

    /// Look up the strategy for an `(entity, operation_name)` pair.
    pub fn lookup(
        &self,
        entity: &str,
        operation_name: &str,
    ) -> QueueResult<Option<Arc<dyn SyncStrategy>>> {
        let strategies = self.strategies.read().map_err(QueueError::lock)?;
        Ok(strategies.get(&strategy_key(entity, operation_name)).cloned())
    }

    /// Number of registered strategies.
    pub fn len(&self) -> usize {
        self.strategies.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether no strategies are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
