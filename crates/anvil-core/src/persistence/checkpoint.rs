//! Persistence-aware middleware.
//!
//! After each successful operation, records the completion in the foundry's
//! bookkeeping keys and saves a snapshot pointing past the furthest completed
//! operation. Failed operations behind that point stay listed under
//! `anvil.failed_indices` so a resumed run re-executes them.

use std::sync::Arc;

use anvil_types::snapshot::ExecutionSnapshot;
use futures_util::future::BoxFuture;
use serde_json::Value;
use uuid::Uuid;

use super::store::SnapshotStore;
use crate::middleware::{Middleware, Next, OperationCall};
use crate::operation::OperationError;

pub struct CheckpointMiddleware<S> {
    store: Arc<S>,
    workflow_id: Uuid,
    workflow_name: String,
}

impl<S: SnapshotStore> CheckpointMiddleware<S> {
    pub fn new(store: Arc<S>, workflow_id: Uuid, workflow_name: impl Into<String>) -> Self {
        Self {
            store,
            workflow_id,
            workflow_name: workflow_name.into(),
        }
    }
}

impl<S: SnapshotStore> Middleware for CheckpointMiddleware<S> {
    fn name(&self) -> &str {
        "checkpoint"
    }

    fn handle<'a>(
        &'a self,
        call: OperationCall<'a>,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Value, OperationError>> {
        Box::pin(async move {
            let foundry = call.foundry;
            let index = call.index;
            let output = next.run(call).await?;

            foundry.record_completion(index, &output);
            let next = foundry.last_completed_index().map_or(index, |last| last.max(index)) + 1;
            let mut snapshot = ExecutionSnapshot::new(
                foundry.execution_id(),
                self.workflow_id,
                self.workflow_name.clone(),
                next,
                foundry.properties(),
            );
            snapshot.saved_at = foundry.clock().utc_now();

            // Save failures are logged, never propagated.
            if let Err(e) = self.store.save(&snapshot).await {
                tracing::warn!(
                    execution_id = %snapshot.execution_id,
                    workflow = %self.workflow_name,
                    index,
                    error = %e,
                    "failed to save checkpoint"
                );
            } else {
                tracing::debug!(
                    execution_id = %snapshot.execution_id,
                    workflow = %self.workflow_name,
                    next_operation_index = next,
                    "checkpoint saved"
                );
            }
            Ok(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::foundry::Foundry;
    use crate::middleware::Pipeline;
    use crate::operation::{BoxOperation, DelegateOperation};
    use crate::persistence::InMemorySnapshotStore;

    #[tokio::test]
    async fn saves_snapshot_after_success_only() {
        let store = InMemorySnapshotStore::new();
        let workflow_id = Uuid::now_v7();
        let pipeline = Pipeline::new(vec![Arc::new(CheckpointMiddleware::new(
            Arc::new(store.clone()),
            workflow_id,
            "checkout",
        ))]);
        let ok = BoxOperation::new(DelegateOperation::new("reserve", |_i, foundry, _c| async move {
            foundry.set("reserved", json!(true));
            Ok(json!("res-1"))
        }));
        let bad = BoxOperation::new(DelegateOperation::new("charge", |_i, _f, _c| async {
            Err(OperationError::failed("declined"))
        }));
        let foundry = Foundry::new();
        let cancel = CancellationToken::new();

        pipeline
            .execute(OperationCall::new(&ok, &foundry, &cancel, Value::Null, 0))
            .await
            .unwrap();
        let snapshot = store.get(foundry.execution_id(), workflow_id).unwrap();
        assert_eq!(snapshot.next_operation_index, 1);
        assert_eq!(snapshot.properties.get("reserved"), Some(&json!(true)));
        assert_eq!(snapshot.properties.get("anvil.output.0"), Some(&json!("res-1")));
        assert_eq!(foundry.last_completed_index(), Some(0));

        pipeline
            .execute(OperationCall::new(&bad, &foundry, &cancel, Value::Null, 1))
            .await
            .unwrap_err();
        let snapshot = store.get(foundry.execution_id(), workflow_id).unwrap();
        assert_eq!(snapshot.next_operation_index, 1);
    }

    #[tokio::test]
    async fn rerunning_an_earlier_failure_keeps_the_resume_point() {
        let store = InMemorySnapshotStore::new();
        let workflow_id = Uuid::now_v7();
        let pipeline = Pipeline::new(vec![Arc::new(CheckpointMiddleware::new(
            Arc::new(store.clone()),
            workflow_id,
            "checkout",
        ))]);
        let op = BoxOperation::new(DelegateOperation::new("step", |input, _f, _c| async move { Ok(input) }));
        let foundry = Foundry::new();
        let cancel = CancellationToken::new();

        pipeline
            .execute(OperationCall::new(&op, &foundry, &cancel, json!("a"), 0))
            .await
            .unwrap();
        foundry.record_failure(1);
        pipeline
            .execute(OperationCall::new(&op, &foundry, &cancel, json!("c"), 2))
            .await
            .unwrap();
        let snapshot = store.get(foundry.execution_id(), workflow_id).unwrap();
        assert_eq!(snapshot.next_operation_index, 3);
        assert_eq!(snapshot.properties.get("anvil.failed_indices"), Some(&json!([1])));

        pipeline
            .execute(OperationCall::new(&op, &foundry, &cancel, json!("b"), 1))
            .await
            .unwrap();
        let snapshot = store.get(foundry.execution_id(), workflow_id).unwrap();
        assert_eq!(snapshot.next_operation_index, 3);
        assert!(!snapshot.properties.contains_key("anvil.failed_indices"));
        assert_eq!(snapshot.properties.get("anvil.output.1"), Some(&json!("b")));
    }
}
