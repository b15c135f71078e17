//! Lifecycle events emitted by the orchestrator.
//!
//! `WorkflowEvent` is the envelope published on a foundry's event hub. Every
//! event carries the execution id, workflow name, and timestamp; the `kind`
//! holds the event-specific identifiers and durations. All types are
//! Clone + Send + Sync for use with tokio broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run::RunStatus;

/// A single lifecycle event of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub execution_id: Uuid,
    pub workflow_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: WorkflowEventKind,
}

impl WorkflowEvent {
    pub fn new(
        execution_id: Uuid,
        workflow_name: impl Into<String>,
        timestamp: DateTime<Utc>,
        kind: WorkflowEventKind,
    ) -> Self {
        Self {
            execution_id,
            workflow_name: workflow_name.into(),
            timestamp,
            kind,
        }
    }

    /// Short snake_case label of the event kind, handy for assertions and logs.
    pub fn label(&self) -> &'static str {
        self.kind.label()
    }
}

/// Event-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEventKind {
    // -- Workflow --
    WorkflowStarted {
        workflow_id: Uuid,
        operation_count: usize,
        /// Index the run starts at (non-zero when resuming from a snapshot).
        start_index: usize,
    },
    WorkflowCompleted {
        duration_ms: u64,
        operations_completed: usize,
    },
    WorkflowFailed {
        error: String,
        duration_ms: u64,
    },

    // -- Operation --
    OperationStarted {
        operation_id: Uuid,
        operation_name: String,
        index: usize,
    },
    OperationCompleted {
        operation_id: Uuid,
        operation_name: String,
        index: usize,
        duration_ms: u64,
    },
    OperationFailed {
        operation_id: Uuid,
        operation_name: String,
        index: usize,
        error: String,
        duration_ms: u64,
    },

    // -- Compensation --
    CompensationTriggered {
        reason: String,
        operations_to_restore: usize,
    },
    CompensationCompleted {
        status: RunStatus,
        restored: usize,
        failed: usize,
        duration_ms: u64,
    },

    // -- Restore --
    OperationRestoreStarted {
        operation_id: Uuid,
        operation_name: String,
        index: usize,
    },
    OperationRestoreCompleted {
        operation_id: Uuid,
        operation_name: String,
        index: usize,
        duration_ms: u64,
    },
    OperationRestoreFailed {
        operation_id: Uuid,
        operation_name: String,
        index: usize,
        error: String,
        duration_ms: u64,
    },
}

impl WorkflowEventKind {
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowEventKind::WorkflowStarted { .. } => "workflow_started",
            WorkflowEventKind::WorkflowCompleted { .. } => "workflow_completed",
            WorkflowEventKind::WorkflowFailed { .. } => "workflow_failed",
            WorkflowEventKind::OperationStarted { .. } => "operation_started",
            WorkflowEventKind::OperationCompleted { .. } => "operation_completed",
            WorkflowEventKind::OperationFailed { .. } => "operation_failed",
            WorkflowEventKind::CompensationTriggered { .. } => "compensation_triggered",
            WorkflowEventKind::CompensationCompleted { .. } => "compensation_completed",
            WorkflowEventKind::OperationRestoreStarted { .. } => "operation_restore_started",
            WorkflowEventKind::OperationRestoreCompleted { .. } => "operation_restore_completed",
            WorkflowEventKind::OperationRestoreFailed { .. } => "operation_restore_failed",
        }
    }

    /// Name of the operation this event concerns, if any.
    pub fn operation_name(&self) -> Option<&str> {
        match self {
            WorkflowEventKind::OperationStarted { operation_name, .. }
            | WorkflowEventKind::OperationCompleted { operation_name, .. }
            | WorkflowEventKind::OperationFailed { operation_name, .. }
            | WorkflowEventKind::OperationRestoreStarted { operation_name, .. }
            | WorkflowEventKind::OperationRestoreCompleted { operation_name, .. }
            | WorkflowEventKind::OperationRestoreFailed { operation_name, .. } => {
                Some(operation_name)
            }
            _ => None,
        }
    }
}
