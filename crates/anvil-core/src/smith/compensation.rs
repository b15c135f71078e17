//! Reverse-order restoration of completed operations.

use anvil_types::event::{WorkflowEvent, WorkflowEventKind};
use anvil_types::run::RunStatus;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::error::RestoreFailure;
use crate::foundry::Foundry;
use crate::operation::{BoxOperation, Operation};

/// An operation that finished its forward pass, with the output `restore`
/// will receive.
#[derive(Debug, Clone)]
pub(crate) struct CompletedOperation {
    pub index: usize,
    pub operation: BoxOperation,
    pub output: Value,
}

#[derive(Debug)]
pub(crate) struct CompensationOutcome {
    pub status: RunStatus,
    pub restored: usize,
    pub failures: Vec<RestoreFailure>,
}

/// Call `restore` on every entry of `completed`, last one first.
///
/// Runs under its own cancellation token: a cancelled forward pass must not
/// abandon the rollback.
pub(crate) async fn compensate(
    completed: &[CompletedOperation],
    foundry: &Foundry,
    workflow_name: &str,
    reason: &str,
    fail_fast: bool,
) -> CompensationOutcome {
    let clock = foundry.clock().clone();
    let publish = |kind: WorkflowEventKind| {
        foundry.events().publish(WorkflowEvent::new(
            foundry.execution_id(),
            workflow_name,
            clock.utc_now(),
            kind,
        ));
    };

    tracing::info!(
        execution_id = %foundry.execution_id(),
        workflow = %workflow_name,
        operations = completed.len(),
        fail_fast,
        "compensation triggered"
    );
    publish(WorkflowEventKind::CompensationTriggered {
        reason: reason.to_string(),
        operations_to_restore: completed.len(),
    });

    let started = clock.now();
    let cancel = CancellationToken::new();
    let mut restored = 0;
    let mut failures = Vec::new();

    for entry in completed.iter().rev() {
        let op = &entry.operation;
        publish(WorkflowEventKind::OperationRestoreStarted {
            operation_id: op.id(),
            operation_name: op.name().to_string(),
            index: entry.index,
        });

        let op_started = clock.now();
        let span = tracing::info_span!("anvil.restore", operation = %op.name(), index = entry.index);
        let result = op
            .restore_boxed(entry.output.clone(), foundry, &cancel)
            .instrument(span)
            .await;
        let duration_ms = clock.now().saturating_duration_since(op_started).as_millis() as u64;

        match result {
            Ok(()) => {
                restored += 1;
                tracing::debug!(operation = %op.name(), index = entry.index, duration_ms, "operation restored");
                publish(WorkflowEventKind::OperationRestoreCompleted {
                    operation_id: op.id(),
                    operation_name: op.name().to_string(),
                    index: entry.index,
                    duration_ms,
                });
            }
            Err(error) => {
                tracing::warn!(operation = %op.name(), index = entry.index, error = %error, "restore failed");
                publish(WorkflowEventKind::OperationRestoreFailed {
                    operation_id: op.id(),
                    operation_name: op.name().to_string(),
                    index: entry.index,
                    error: error.to_string(),
                    duration_ms,
                });
                failures.push(RestoreFailure {
                    operation_id: op.id(),
                    operation: op.name().to_string(),
                    index: entry.index,
                    error,
                });
                if fail_fast {
                    break;
                }
            }
        }
    }

    let status = if failures.is_empty() {
        RunStatus::Compensated
    } else {
        RunStatus::CompensationFailed
    };
    let duration_ms = clock.now().saturating_duration_since(started).as_millis() as u64;
    tracing::info!(
        execution_id = %foundry.execution_id(),
        %status,
        restored,
        failed = failures.len(),
        duration_ms,
        "compensation finished"
    );
    publish(WorkflowEventKind::CompensationCompleted {
        status,
        restored,
        failed: failures.len(),
        duration_ms,
    });

    CompensationOutcome {
        status,
        restored,
        failures,
    }
}
