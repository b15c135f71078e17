//! The orchestrator.
//!
//! `Smith` runs a workflow's operations in order against one foundry,
//! checkpoints progress after every success, and on failure restores the
//! completed operations in reverse. A `Smith` is cheap to clone and may run
//! many workflows at once, bounded by `max_concurrent_workflows`.

mod compensation;
mod error;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anvil_types::config::ForgeSettings;
use anvil_types::event::{WorkflowEvent, WorkflowEventKind};
use anvil_types::run::RunStatus;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use self::compensation::{CompensationOutcome, CompletedOperation, compensate};
use self::state::RunState;
use crate::foundry::Foundry;
use crate::middleware::{Middleware, OperationCall, Pipeline};
use crate::operation::Operation;
use crate::persistence::{CheckpointMiddleware, NoSnapshots, SnapshotStore};
use crate::resilience::{CircuitBreakerMiddleware, CircuitBreakerPolicy, RetryMiddleware, build_strategy};
use crate::workflow::{Workflow, WorkflowError};

pub use error::{ForgeError, OperationFailure, RestoreFailure};

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub workflow_name: String,
    pub status: RunStatus,
    /// Operations completed across the whole execution, resumed ones included.
    pub completed_operations: usize,
    /// Output of the furthest operation in the workflow that completed.
    pub output: Value,
    pub duration: Duration,
}

/// Whether a failed run restores its completed operations before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompensationMode {
    Immediate,
    /// Keep the snapshot and skip compensation so a later attempt can resume.
    Deferred,
}

/// Workflow orchestrator.
pub struct Smith<S: SnapshotStore = NoSnapshots> {
    settings: Arc<ForgeSettings>,
    store: Arc<S>,
    limiter: Option<Arc<Semaphore>>,
    running: Arc<DashMap<Uuid, CancellationToken>>,
    /// Retry and circuit breaker links built from settings, shared by every run.
    resilience: Vec<Arc<dyn Middleware>>,
}

impl Smith<NoSnapshots> {
    /// Orchestrator without persistence.
    pub fn new(settings: ForgeSettings) -> Result<Self, WorkflowError> {
        Self::with_store(settings, NoSnapshots)
    }
}

impl<S: SnapshotStore> Smith<S> {
    /// Orchestrator that checkpoints into `store`.
    pub fn with_store(settings: ForgeSettings, store: S) -> Result<Self, WorkflowError> {
        let mut resilience: Vec<Arc<dyn Middleware>> = Vec::new();
        if let Some(retry) = &settings.retry {
            let strategy = build_strategy(retry).map_err(|e| WorkflowError::InvalidSettings(e.to_string()))?;
            resilience.push(Arc::new(RetryMiddleware::new(strategy)));
        }
        if let Some(breaker) = &settings.circuit_breaker {
            if breaker.failure_threshold == 0 {
                return Err(WorkflowError::InvalidSettings(
                    "circuit_breaker.failure_threshold must be at least 1".to_string(),
                ));
            }
            let policy = Arc::new(CircuitBreakerPolicy::from_settings("smith", breaker));
            resilience.push(Arc::new(CircuitBreakerMiddleware::new(policy)));
        }

        let limiter = (settings.max_concurrent_workflows > 0)
            .then(|| Arc::new(Semaphore::new(settings.max_concurrent_workflows)));

        Ok(Self {
            settings: Arc::new(settings),
            store: Arc::new(store),
            limiter,
            running: Arc::new(DashMap::new()),
            resilience,
        })
    }

    pub fn settings(&self) -> &ForgeSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Whether an execution with this id is currently running here.
    pub fn is_running(&self, execution_id: Uuid) -> bool {
        self.running.contains_key(&execution_id)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Signal cancellation to a running execution.
    ///
    /// Returns `false` if no execution with that id is running. The run stops
    /// before its next operation and then compensates.
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        match self.running.get(&execution_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(execution_id = %execution_id, "workflow cancelled");
                true
            }
            None => false,
        }
    }

    /// Run `workflow` against `foundry`.
    pub async fn forge(&self, workflow: &Workflow, foundry: &Foundry) -> Result<ExecutionReport, ForgeError> {
        self.forge_with_cancel(workflow, foundry, &CancellationToken::new()).await
    }

    /// Run `workflow`, stopping cooperatively once `cancel` fires.
    pub async fn forge_with_cancel(
        &self,
        workflow: &Workflow,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ForgeError> {
        self.run(workflow, foundry, cancel, CompensationMode::Immediate).await
    }

    pub(crate) async fn run(
        &self,
        workflow: &Workflow,
        foundry: &Foundry,
        cancel: &CancellationToken,
        mode: CompensationMode,
    ) -> Result<ExecutionReport, ForgeError> {
        let _permit = self.acquire_permit()?;

        let execution_id = foundry.execution_id();
        let token = cancel.child_token();
        self.running.insert(execution_id, token.clone());
        let _registration = Registration {
            running: &self.running,
            execution_id,
        };

        let span = tracing::info_span!(
            parent: foundry.span(),
            "anvil.forge",
            execution_id = %execution_id,
            workflow = %workflow.name(),
        );
        self.execute_run(workflow, foundry, &token, mode).instrument(span).await
    }

    fn acquire_permit(&self) -> Result<Option<OwnedSemaphorePermit>, ForgeError> {
        match &self.limiter {
            Some(semaphore) => Arc::clone(semaphore)
                .try_acquire_owned()
                .map(Some)
                .map_err(|_| ForgeError::ConcurrencyLimitReached {
                    limit: self.settings.max_concurrent_workflows,
                }),
            None => Ok(None),
        }
    }

    async fn execute_run(
        &self,
        workflow: &Workflow,
        foundry: &Foundry,
        cancel: &CancellationToken,
        mode: CompensationMode,
    ) -> Result<ExecutionReport, ForgeError> {
        let clock = Arc::clone(foundry.clock());
        let execution_id = foundry.execution_id();
        let operations = workflow.operations();
        let chaining = self.settings.enable_output_chaining;
        let started = clock.now();

        let start_index = match self.store.try_load(execution_id, workflow.id()).await? {
            Some(snapshot) => {
                if snapshot.next_operation_index > operations.len() {
                    return Err(WorkflowError::SnapshotOutOfRange {
                        workflow: workflow.name().to_string(),
                        index: snapshot.next_operation_index,
                        operations: operations.len(),
                    }
                    .into());
                }
                tracing::info!(
                    next_operation_index = snapshot.next_operation_index,
                    saved_at = %snapshot.saved_at,
                    "resuming from snapshot"
                );
                foundry.replace_properties(snapshot.properties);
                snapshot.next_operation_index
            }
            // A recovery attempt without a stored snapshot picks up from the
            // foundry's own bookkeeping.
            None if mode == CompensationMode::Deferred => foundry
                .last_completed_index()
                .map_or(0, |last| (last + 1).min(operations.len())),
            None => 0,
        };
        let rerun: Vec<usize> = foundry
            .failed_indices()
            .into_iter()
            .filter(|&index| index < start_index)
            .collect();
        if !rerun.is_empty() {
            tracing::info!(?rerun, "re-running operations that failed before the resume point");
        }

        let mut state = RunState::new(execution_id);
        state.advance(RunStatus::Running);
        tracing::info!(operations = operations.len(), start_index, "workflow started");
        emit(
            foundry,
            workflow.name(),
            WorkflowEventKind::WorkflowStarted {
                workflow_id: workflow.id(),
                operation_count: operations.len(),
                start_index,
            },
        );

        // Checkpoint outermost so retries never checkpoint twice.
        let mut links: Vec<Arc<dyn Middleware>> = vec![Arc::new(CheckpointMiddleware::new(
            Arc::clone(&self.store),
            workflow.id(),
            workflow.name(),
        ))];
        links.extend(self.resilience.iter().cloned());
        links.extend(foundry.middlewares());
        let pipeline = Pipeline::new(links);

        let mut completed = checkpointed_operations(workflow, foundry, start_index);
        let mut input = Value::Null;
        let mut failures: Vec<OperationFailure> = Vec::new();
        let mut cancelled = false;

        for (index, operation) in operations.iter().enumerate() {
            if index < start_index && !rerun.contains(&index) {
                if chaining {
                    if let Some(output) = foundry.completed_output(index) {
                        input = output;
                    }
                }
                continue;
            }
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            emit(
                foundry,
                workflow.name(),
                WorkflowEventKind::OperationStarted {
                    operation_id: operation.id(),
                    operation_name: operation.name().to_string(),
                    index,
                },
            );
            let op_started = clock.now();
            let span = tracing::info_span!("anvil.operation", operation = %operation.name(), index);
            let result = pipeline
                .execute(OperationCall::new(operation, foundry, cancel, input.clone(), index))
                .instrument(span)
                .await;
            let duration_ms = clock.now().saturating_duration_since(op_started).as_millis() as u64;

            match result {
                Ok(output) => {
                    tracing::debug!(operation = %operation.name(), index, duration_ms, "operation completed");
                    emit(
                        foundry,
                        workflow.name(),
                        WorkflowEventKind::OperationCompleted {
                            operation_id: operation.id(),
                            operation_name: operation.name().to_string(),
                            index,
                            duration_ms,
                        },
                    );
                    if chaining {
                        input = output.clone();
                    }
                    completed.push(CompletedOperation {
                        index,
                        operation: operation.clone(),
                        output,
                    });
                }
                Err(error) => {
                    tracing::warn!(operation = %operation.name(), index, duration_ms, error = %error, "operation failed");
                    emit(
                        foundry,
                        workflow.name(),
                        WorkflowEventKind::OperationFailed {
                            operation_id: operation.id(),
                            operation_name: operation.name().to_string(),
                            index,
                            error: error.to_string(),
                            duration_ms,
                        },
                    );
                    if error.is_cancellation() || cancel.is_cancelled() {
                        cancelled = true;
                        break;
                    }
                    foundry.record_failure(index);
                    failures.push(OperationFailure {
                        operation_id: operation.id(),
                        operation: operation.name().to_string(),
                        index,
                        error,
                    });
                    if !self.settings.continue_on_error {
                        break;
                    }
                }
            }
        }

        let duration = clock.now().saturating_duration_since(started);

        if !cancelled && failures.is_empty() {
            state.advance(RunStatus::Completed);
            self.discard_snapshot(execution_id, workflow).await;
            tracing::info!(
                operations_completed = completed.len(),
                duration_ms = duration.as_millis() as u64,
                "workflow completed"
            );
            emit(
                foundry,
                workflow.name(),
                WorkflowEventKind::WorkflowCompleted {
                    duration_ms: duration.as_millis() as u64,
                    operations_completed: completed.len(),
                },
            );
            let output = completed
                .iter()
                .max_by_key(|c| c.index)
                .map(|c| c.output.clone())
                .unwrap_or(Value::Null);
            return Ok(ExecutionReport {
                execution_id,
                workflow_name: workflow.name().to_string(),
                status: state.status(),
                completed_operations: completed.len(),
                output,
                duration,
            });
        }

        let error = if cancelled {
            ForgeError::Cancelled
        } else if !self.settings.continue_on_error && failures.len() == 1 {
            let failure = failures.swap_remove(0);
            ForgeError::OperationFailed {
                operation: failure.operation,
                index: failure.index,
                source: failure.error,
            }
        } else {
            ForgeError::Aggregate(failures)
        };

        state.advance(RunStatus::Failed);
        tracing::warn!(duration_ms = duration.as_millis() as u64, error = %error, "workflow failed");
        emit(
            foundry,
            workflow.name(),
            WorkflowEventKind::WorkflowFailed {
                error: error.to_string(),
                duration_ms: duration.as_millis() as u64,
            },
        );

        if mode == CompensationMode::Deferred {
            return Err(error);
        }

        state.advance(RunStatus::Compensating);
        let outcome = compensate(
            &completed,
            foundry,
            workflow.name(),
            &error.to_string(),
            self.settings.fail_fast_compensation,
        )
        .await;
        state.advance(outcome.status);
        self.discard_snapshot(execution_id, workflow).await;
        Err(self.conclude(error, outcome))
    }

    /// Restore the operations recorded as completed for this execution,
    /// then drop its snapshot. Used once resume attempts are exhausted.
    pub(crate) async fn compensate_checkpointed(
        &self,
        workflow: &Workflow,
        foundry: &Foundry,
        cause: ForgeError,
    ) -> ForgeError {
        let execution_id = foundry.execution_id();
        let fallback = foundry.last_completed_index().map_or(0, |i| i + 1);
        let next = match self.store.try_load(execution_id, workflow.id()).await {
            Ok(Some(snapshot)) => snapshot.next_operation_index,
            Ok(None) => fallback,
            Err(e) => {
                tracing::warn!(execution_id = %execution_id, error = %e, "failed to load snapshot for compensation");
                fallback
            }
        };

        let completed = checkpointed_operations(workflow, foundry, next.min(workflow.len()));
        let outcome = compensate(
            &completed,
            foundry,
            workflow.name(),
            &cause.to_string(),
            self.settings.fail_fast_compensation,
        )
        .await;
        self.discard_snapshot(execution_id, workflow).await;
        self.conclude(cause, outcome)
    }

    fn conclude(&self, cause: ForgeError, outcome: CompensationOutcome) -> ForgeError {
        if self.settings.throw_on_compensation_error && !outcome.failures.is_empty() {
            ForgeError::CompensationFailed {
                cause: Box::new(cause),
                failures: outcome.failures,
            }
        } else {
            cause
        }
    }

    async fn discard_snapshot(&self, execution_id: Uuid, workflow: &Workflow) {
        if let Err(e) = self.store.delete(execution_id, workflow.id()).await {
            tracing::warn!(execution_id = %execution_id, error = %e, "failed to delete snapshot");
        }
    }
}

impl<S: SnapshotStore> Clone for Smith<S> {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            store: Arc::clone(&self.store),
            limiter: self.limiter.clone(),
            running: Arc::clone(&self.running),
            resilience: self.resilience.clone(),
        }
    }
}

impl<S: SnapshotStore> std::fmt::Debug for Smith<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Smith")
            .field("settings", &self.settings)
            .field("running", &self.running.len())
            .field(
                "resilience",
                &self.resilience.iter().map(|m| m.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Removes the execution's cancellation token when the run ends.
struct Registration<'a> {
    running: &'a DashMap<Uuid, CancellationToken>,
    execution_id: Uuid,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.execution_id);
    }
}

/// Operations before `next` whose outputs were recorded in the foundry.
fn checkpointed_operations(workflow: &Workflow, foundry: &Foundry, next: usize) -> Vec<CompletedOperation> {
    workflow
        .operations()
        .iter()
        .enumerate()
        .take(next)
        .filter_map(|(index, operation)| {
            foundry.completed_output(index).map(|output| CompletedOperation {
                index,
                operation: operation.clone(),
                output,
            })
        })
        .collect()
}

fn emit(foundry: &Foundry, workflow_name: &str, kind: WorkflowEventKind) {
    foundry.events().publish(WorkflowEvent::new(
        foundry.execution_id(),
        workflow_name,
        foundry.clock().utc_now(),
        kind,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use anvil_types::config::{CircuitBreakerSettings, RetrySettings, RetryStrategyKind};
    use anvil_types::snapshot::ExecutionSnapshot;
    use serde_json::json;

    use crate::operation::{BoxOperation, ConditionalOperation, DelayOperation, DelegateOperation, OperationError};
    use crate::persistence::InMemorySnapshotStore;
    use crate::testing::{Journal, RecordingListener, RecordingOperation};

    fn workflow(ops: Vec<RecordingOperation>) -> Workflow {
        ops.into_iter()
            .fold(Workflow::builder("checkout"), |b, op| b.add_operation(op))
            .build()
            .unwrap()
    }

    fn smith(configure: impl FnOnce(&mut ForgeSettings)) -> Smith {
        let mut settings = ForgeSettings::default();
        configure(&mut settings);
        Smith::new(settings).unwrap()
    }

    #[tokio::test]
    async fn runs_in_declaration_order_without_compensation() {
        let journal = Journal::new();
        let wf = workflow(vec![
            RecordingOperation::new("a", &journal),
            RecordingOperation::new("b", &journal),
            RecordingOperation::new("c", &journal),
        ]);
        let foundry = Foundry::new();

        let report = smith(|_| {}).forge(&wf, &foundry).await.unwrap();

        assert_eq!(journal.entries(), vec!["execute:a", "execute:b", "execute:c"]);
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.completed_operations, 3);
        assert_eq!(report.output, json!("c"));
        assert_eq!(report.execution_id, foundry.execution_id());
        assert_eq!(foundry.last_completed_index(), Some(2));
    }

    #[tokio::test]
    async fn stop_on_first_error_restores_prior_steps_in_reverse() {
        let journal = Journal::new();
        let wf = workflow(vec![
            RecordingOperation::new("a", &journal),
            RecordingOperation::new("b", &journal),
            RecordingOperation::new("c", &journal).failing(),
            RecordingOperation::new("d", &journal),
        ]);
        let foundry = Foundry::new();

        let err = smith(|_| {}).forge(&wf, &foundry).await.unwrap_err();

        assert_eq!(
            journal.entries(),
            vec!["execute:a", "execute:b", "execute:c", "restore:b", "restore:a"]
        );
        match err {
            ForgeError::OperationFailed { operation, index, source } => {
                assert_eq!(operation, "c");
                assert_eq!(index, 2);
                assert_eq!(source.to_string(), "c failed");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!foundry.contains("a"));
        assert!(!foundry.contains("b"));
    }

    #[tokio::test]
    async fn continue_on_error_runs_everything_and_aggregates() {
        let journal = Journal::new();
        let wf = workflow(vec![
            RecordingOperation::new("a", &journal),
            RecordingOperation::new("b", &journal).failing(),
            RecordingOperation::new("c", &journal),
            RecordingOperation::new("d", &journal).failing(),
        ]);

        let err = smith(|s| s.continue_on_error = true)
            .forge(&wf, &Foundry::new())
            .await
            .unwrap_err();

        assert_eq!(
            journal.with_prefix("execute:"),
            vec!["execute:a", "execute:b", "execute:c", "execute:d"]
        );
        assert_eq!(journal.with_prefix("restore:"), vec!["restore:c", "restore:a"]);
        match err {
            ForgeError::Aggregate(failures) => {
                let names: Vec<_> = failures.iter().map(|f| f.operation.as_str()).collect();
                assert_eq!(names, vec!["b", "d"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn restore_failures_are_reported_only_when_asked() {
        let journal = Journal::new();
        let ops = || {
            vec![
                RecordingOperation::new("a", &journal).failing_restore(),
                RecordingOperation::new("b", &journal),
                RecordingOperation::new("c", &journal).failing(),
            ]
        };

        let quiet = smith(|_| {}).forge(&workflow(ops()), &Foundry::new()).await.unwrap_err();
        assert!(matches!(quiet, ForgeError::OperationFailed { .. }));

        let loud = smith(|s| s.throw_on_compensation_error = true)
            .forge(&workflow(ops()), &Foundry::new())
            .await
            .unwrap_err();
        match loud {
            ForgeError::CompensationFailed { cause, failures } => {
                assert!(matches!(*cause, ForgeError::OperationFailed { index: 2, .. }));
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].operation, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn fail_fast_compensation_stops_the_walk() {
        let journal = Journal::new();
        let wf = workflow(vec![
            RecordingOperation::new("a", &journal),
            RecordingOperation::new("b", &journal).failing_restore(),
            RecordingOperation::new("c", &journal).failing(),
        ]);

        smith(|s| s.fail_fast_compensation = true)
            .forge(&wf, &Foundry::new())
            .await
            .unwrap_err();

        assert_eq!(journal.with_prefix("restore:"), vec!["restore:b"]);
    }

    #[tokio::test]
    async fn events_mirror_execution_order() {
        let journal = Journal::new();
        let wf = workflow(vec![
            RecordingOperation::new("a", &journal),
            RecordingOperation::new("b", &journal).failing(),
        ]);
        let foundry = Foundry::new();
        let listener = RecordingListener::new();
        foundry.events().add_listener(Arc::new(listener.clone()));

        smith(|_| {}).forge(&wf, &foundry).await.unwrap_err();

        assert_eq!(
            listener.labels(),
            vec![
                "workflow_started",
                "operation_started",
                "operation_completed",
                "operation_started",
                "operation_failed",
                "workflow_failed",
                "compensation_triggered",
                "operation_restore_started",
                "operation_restore_completed",
                "compensation_completed",
            ]
        );
        let last = listener.events().pop().unwrap();
        assert!(matches!(
            last.kind,
            WorkflowEventKind::CompensationCompleted {
                status: RunStatus::Compensated,
                restored: 1,
                failed: 0,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn panicking_listener_does_not_break_the_run() {
        let journal = Journal::new();
        let wf = workflow(vec![RecordingOperation::new("a", &journal)]);
        let foundry = Foundry::new();
        foundry.events().on(|_event: &WorkflowEvent| panic!("listener bug"));

        let report = smith(|_| {}).forge(&wf, &foundry).await.unwrap();
        assert_eq!(report.completed_operations, 1);
    }

    #[tokio::test]
    async fn output_chaining_feeds_the_next_operation() {
        let add_one = || {
            DelegateOperation::new("add one", |input: Value, _f, _c| async move {
                Ok(json!(input.as_i64().unwrap_or(0) + 1))
            })
        };
        let wf = Workflow::builder("count")
            .add_operation(add_one())
            .add_operation(add_one())
            .add_operation(add_one())
            .build()
            .unwrap();

        let chained = smith(|_| {}).forge(&wf, &Foundry::new()).await.unwrap();
        assert_eq!(chained.output, json!(3));

        let unchained = smith(|s| s.enable_output_chaining = false)
            .forge(&wf, &Foundry::new())
            .await
            .unwrap();
        assert_eq!(unchained.output, json!(1));
    }

    #[tokio::test]
    async fn conditional_output_chains_unwrapped() {
        let wf = Workflow::builder("pricing")
            .add_operation(ConditionalOperation::new(
                "discount?",
                |_input, _foundry| true,
                BoxOperation::new(DelegateOperation::new("discount", |_i, _f, _c| async { Ok(json!(90)) })),
            ))
            .add_operation(DelegateOperation::new("add tax", |input: Value, _f, _c| async move {
                Ok(json!(input.as_i64().unwrap_or(0) + 10))
            }))
            .build()
            .unwrap();

        let report = smith(|_| {}).forge(&wf, &Foundry::new()).await.unwrap();

        assert_eq!(report.output, json!(100));
    }

    #[tokio::test]
    async fn resumes_from_snapshot_and_matches_uninterrupted_state() {
        let ids = [Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7()];
        let workflow_id = Uuid::now_v7();
        let build = |journal: &Journal| {
            Workflow::builder("checkout")
                .with_id(workflow_id)
                .add_operation(RecordingOperation::new("a", journal).with_id(ids[0]))
                .add_operation(RecordingOperation::new("b", journal).with_id(ids[1]))
                .add_operation(RecordingOperation::new("c", journal).with_id(ids[2]))
                .build()
                .unwrap()
        };

        // Uninterrupted reference run.
        let reference = Foundry::new();
        smith(|_| {}).forge(&build(&Journal::new()), &reference).await.unwrap();

        // A previous process completed step `a` and then crashed.
        let store = InMemorySnapshotStore::new();
        let execution_id = Uuid::now_v7();
        let crashed = Foundry::with_execution_id(execution_id);
        crashed.set("a", json!(true));
        crashed.record_completion(0, &json!("a"));
        store
            .save(&ExecutionSnapshot::new(
                execution_id,
                workflow_id,
                "checkout",
                1,
                crashed.properties(),
            ))
            .await
            .unwrap();

        let journal = Journal::new();
        let resumed = Foundry::with_execution_id(execution_id);
        let report = Smith::with_store(ForgeSettings::default(), store.clone())
            .unwrap()
            .forge(&build(&journal), &resumed)
            .await
            .unwrap();

        assert_eq!(journal.entries(), vec!["execute:b", "execute:c"]);
        assert_eq!(report.completed_operations, 3);
        assert_eq!(resumed.properties(), reference.properties());
        assert!(store.get(execution_id, workflow_id).is_none());
    }

    #[tokio::test]
    async fn snapshot_past_the_end_is_a_configuration_error() {
        let store = InMemorySnapshotStore::new();
        let wf = workflow(vec![RecordingOperation::new("a", &Journal::new())]);
        let foundry = Foundry::new();
        store
            .save(&ExecutionSnapshot::new(
                foundry.execution_id(),
                wf.id(),
                "checkout",
                5,
                HashMap::new(),
            ))
            .await
            .unwrap();

        let err = Smith::with_store(ForgeSettings::default(), store)
            .unwrap()
            .forge(&wf, &foundry)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ForgeError::Configuration(WorkflowError::SnapshotOutOfRange { index: 5, operations: 1, .. })
        ));
    }

    #[tokio::test]
    async fn failed_run_compensates_and_drops_its_snapshot() {
        let store = InMemorySnapshotStore::new();
        let journal = Journal::new();
        let wf = workflow(vec![
            RecordingOperation::new("a", &journal),
            RecordingOperation::new("b", &journal).failing(),
        ]);
        let foundry = Foundry::new();

        Smith::with_store(ForgeSettings::default(), store.clone())
            .unwrap()
            .forge(&wf, &foundry)
            .await
            .unwrap_err();

        assert_eq!(journal.with_prefix("restore:"), vec!["restore:a"]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn pre_cancelled_token_runs_nothing() {
        let journal = Journal::new();
        let wf = workflow(vec![RecordingOperation::new("a", &journal)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = smith(|_| {})
            .forge_with_cancel(&wf, &Foundry::new(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ForgeError::Cancelled));
        assert!(journal.entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_by_execution_id_stops_and_compensates() {
        let journal = Journal::new();
        let wf = Workflow::builder("slow")
            .add_operation(RecordingOperation::new("a", &journal))
            .add_operation(DelayOperation::new(Duration::from_secs(3600)))
            .add_operation(RecordingOperation::new("c", &journal))
            .build()
            .unwrap();
        let smith = smith(|_| {});
        let foundry = Foundry::new();
        let execution_id = foundry.execution_id();

        let handle = tokio::spawn({
            let smith = smith.clone();
            let wf = wf.clone();
            let foundry = foundry.clone();
            async move { smith.forge(&wf, &foundry).await }
        });
        while !smith.is_running(execution_id) || journal.entries().is_empty() {
            tokio::task::yield_now().await;
        }

        assert!(smith.cancel(execution_id));
        let err = handle.await.unwrap().unwrap_err();

        assert!(matches!(err, ForgeError::Cancelled));
        assert_eq!(journal.entries(), vec!["execute:a", "restore:a"]);
        assert!(!smith.is_running(execution_id));
        assert!(!smith.cancel(execution_id));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_limit_rejects_extra_runs() {
        let smith = smith(|s| s.max_concurrent_workflows = 1);
        let wf = Workflow::builder("slow")
            .add_operation(DelayOperation::new(Duration::from_secs(3600)))
            .build()
            .unwrap();
        let first = Foundry::new();
        let first_id = first.execution_id();

        let handle = tokio::spawn({
            let smith = smith.clone();
            let wf = wf.clone();
            async move { smith.forge(&wf, &first).await }
        });
        while !smith.is_running(first_id) {
            tokio::task::yield_now().await;
        }

        let err = smith.forge(&wf, &Foundry::new()).await.unwrap_err();
        assert!(matches!(err, ForgeError::ConcurrencyLimitReached { limit: 1 }));

        smith.cancel(first_id);
        assert!(matches!(handle.await.unwrap(), Err(ForgeError::Cancelled)));
        assert_eq!(smith.running_count(), 0);
    }

    #[tokio::test]
    async fn retry_settings_wrap_every_operation() {
        let journal = Journal::new();
        let wf = workflow(vec![RecordingOperation::new("flaky", &journal).failing_times(2)]);
        let mut retry = RetrySettings::new(RetryStrategyKind::FixedInterval);
        retry.interval_ms = 0;

        let report = smith(|s| s.retry = Some(retry)).forge(&wf, &Foundry::new()).await.unwrap();

        assert_eq!(report.completed_operations, 1);
        assert_eq!(journal.entries().len(), 3);
    }

    #[test]
    fn invalid_retry_settings_are_rejected() {
        let mut retry = RetrySettings::new(RetryStrategyKind::ExponentialBackoff);
        retry.multiplier = 0.5;
        let mut settings = ForgeSettings::default();
        settings.retry = Some(retry);

        assert!(matches!(Smith::new(settings), Err(WorkflowError::InvalidSettings(_))));
    }

    #[tokio::test]
    async fn resumed_run_reexecutes_failures_behind_the_snapshot() {
        let store = InMemorySnapshotStore::new();
        let journal = Journal::new();
        let wf = workflow(vec![
            RecordingOperation::new("a", &journal),
            RecordingOperation::new("b", &journal).failing_times(1),
            RecordingOperation::new("c", &journal),
        ]);
        let foundry = Foundry::new();
        let smith = Smith::with_store(
            ForgeSettings {
                continue_on_error: true,
                ..ForgeSettings::default()
            },
            store.clone(),
        )
        .unwrap();

        let err = smith
            .run(&wf, &foundry, &CancellationToken::new(), CompensationMode::Deferred)
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Aggregate(ref failures) if failures.len() == 1));
        let snapshot = store.get(foundry.execution_id(), wf.id()).unwrap();
        assert_eq!(snapshot.next_operation_index, 3);

        let report = smith.forge(&wf, &Foundry::with_execution_id(foundry.execution_id())).await.unwrap();

        assert_eq!(
            journal.entries(),
            vec!["execute:a", "execute:b", "execute:c", "execute:b"]
        );
        assert_eq!(report.completed_operations, 3);
        assert_eq!(report.output, json!("c"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn open_circuit_fails_later_operations_without_invoking_them() {
        let journal = Journal::new();
        let wf = workflow(vec![
            RecordingOperation::new("a", &journal),
            RecordingOperation::new("b", &journal).failing(),
            RecordingOperation::new("c", &journal),
        ]);
        let smith = smith(|s| {
            s.continue_on_error = true;
            s.circuit_breaker = Some(CircuitBreakerSettings {
                failure_threshold: 1,
                break_duration_ms: 60_000,
            });
        });

        let err = smith.forge(&wf, &Foundry::new()).await.unwrap_err();

        assert_eq!(
            journal.entries(),
            vec!["execute:a", "execute:b", "restore:a"]
        );
        match err {
            ForgeError::Aggregate(failures) => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[1].operation, "c");
                assert!(failures[1].error.is_circuit_open());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn open_circuit_is_shared_across_runs() {
        let journal = Journal::new();
        let smith = smith(|s| {
            s.circuit_breaker = Some(CircuitBreakerSettings {
                failure_threshold: 1,
                break_duration_ms: 60_000,
            });
        });
        let broken = workflow(vec![RecordingOperation::new("x", &journal).failing()]);
        smith.forge(&broken, &Foundry::new()).await.unwrap_err();

        journal.clear();
        let wf = workflow(vec![
            RecordingOperation::new("a", &journal),
            RecordingOperation::new("b", &journal),
        ]);
        let err = smith.forge(&wf, &Foundry::new()).await.unwrap_err();

        match err {
            ForgeError::OperationFailed { operation, index, source } => {
                assert_eq!(operation, "a");
                assert_eq!(index, 0);
                assert!(source.is_circuit_open());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(journal.with_prefix("execute:").is_empty());
    }

    #[test]
    fn zero_failure_threshold_is_rejected() {
        let settings = ForgeSettings {
            circuit_breaker: Some(CircuitBreakerSettings {
                failure_threshold: 0,
                break_duration_ms: 1_000,
            }),
            ..ForgeSettings::default()
        };

        assert!(matches!(Smith::new(settings), Err(WorkflowError::InvalidSettings(_))));
    }

    #[tokio::test]
    async fn operation_error_cancellation_is_not_collected_as_failure() {
        let wf = Workflow::builder("cancelling")
            .add_operation(DelegateOperation::new("gives up", |_i, _f, _c| async {
                Err(OperationError::Cancelled)
            }))
            .build()
            .unwrap();

        let err = smith(|s| s.continue_on_error = true)
            .forge(&wf, &Foundry::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Cancelled));
    }
}
