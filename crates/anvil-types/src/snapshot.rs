//! Persisted progress marker for crash-resumable executions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Checkpoint of a workflow execution.
///
/// Keyed by `(execution_id, workflow_id)`. Overwritten after every completed
/// operation, deleted once the run succeeds, and read once when a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    /// Identity of the foundry the run executes against.
    pub execution_id: Uuid,
    /// Identity of the workflow definition.
    pub workflow_id: Uuid,
    /// Workflow name (informational, not part of the key).
    pub workflow_name: String,
    /// Index of the first operation that has not completed yet.
    pub next_operation_index: usize,
    /// Full property bag at checkpoint time, including engine bookkeeping.
    pub properties: HashMap<String, Value>,
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
}

impl ExecutionSnapshot {
    /// Create a snapshot stamped with the current time.
    pub fn new(
        execution_id: Uuid,
        workflow_id: Uuid,
        workflow_name: impl Into<String>,
        next_operation_index: usize,
        properties: HashMap<String, Value>,
    ) -> Self {
        Self {
            execution_id,
            workflow_id,
            workflow_name: workflow_name.into(),
            next_operation_index,
            properties,
            saved_at: Utc::now(),
        }
    }

    /// The storage key for this snapshot.
    pub fn key(&self) -> (Uuid, Uuid) {
        (self.execution_id, self.workflow_id)
    }
}
