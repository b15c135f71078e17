//! Parallel group: a fixed set of branches run concurrently against one foundry.
//!
//! Concurrency is bounded by a semaphore and the whole group by an optional
//! timeout. Every branch result is collected before the group completes.
//! Branches share the foundry, so property writes rely on its internal
//! synchronization (last writer wins).

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{BoxOperation, Operation, OperationError};
use crate::foundry::Foundry;

#[derive(Debug, Clone)]
pub struct ParallelOperation {
    id: Uuid,
    name: String,
    branches: Vec<BoxOperation>,
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
}

impl ParallelOperation {
    pub fn new(name: impl Into<String>, branches: Vec<BoxOperation>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            branches,
            max_concurrency: None,
            timeout: None,
        }
    }

    /// Cap on branches running at once (at least 1).
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Budget for the whole group.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn branches(&self) -> &[BoxOperation] {
        &self.branches
    }

    /// Restore the branches that succeeded, last declared first.
    async fn unwind(&self, outputs: &[Option<Value>], foundry: &Foundry) {
        let cancel = CancellationToken::new();
        for (branch, output) in self.branches.iter().zip(outputs).rev() {
            let Some(output) = output else { continue };
            if let Err(err) = branch.restore_boxed(output.clone(), foundry, &cancel).await {
                tracing::warn!(
                    group = %self.name,
                    branch = branch.name(),
                    error = %err,
                    "failed to restore parallel branch"
                );
            }
        }
    }
}

impl Operation for ParallelOperation {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_restore(&self) -> bool {
        self.branches.iter().any(|b| b.supports_restore())
    }

    fn execute(
        &self,
        input: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Value, OperationError>> + Send {
        async move {
            let count = self.branches.len();
            let group_cancel = cancel.child_token();
            let permits = self.max_concurrency.unwrap_or(count).max(1);
            let semaphore = Arc::new(Semaphore::new(permits));
            let mut set = JoinSet::new();

            for (position, branch) in self.branches.iter().cloned().enumerate() {
                let input = input.clone();
                let foundry = foundry.clone();
                let cancel = group_cancel.clone();
                let semaphore = Arc::clone(&semaphore);
                set.spawn(async move {
                    let _permit = tokio::select! {
                        permit = semaphore.acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return (position, Err(OperationError::Cancelled)),
                        },
                        _ = cancel.cancelled() => return (position, Err(OperationError::Cancelled)),
                    };
                    let result = AssertUnwindSafe(branch.execute(input, &foundry, &cancel))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(OperationError::failed(format!("branch '{}' panicked", branch.name())))
                        });
                    (position, result)
                });
            }

            tracing::debug!(group = %self.name, branches = count, permits, "parallel group started");

            let deadline = self.timeout.map(|t| tokio::time::Instant::now() + t);
            let mut results: Vec<Option<Result<Value, OperationError>>> = (0..count).map(|_| None).collect();
            let mut timed_out = false;

            loop {
                let joined = match deadline {
                    Some(deadline) => match tokio::time::timeout_at(deadline, set.join_next()).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            timed_out = true;
                            group_cancel.cancel();
                            set.abort_all();
                            break;
                        }
                    },
                    None => set.join_next().await,
                };
                match joined {
                    Some(Ok((position, result))) => results[position] = Some(result),
                    Some(Err(e)) => tracing::warn!(group = %self.name, error = %e, "parallel branch task lost"),
                    None => break,
                }
            }

            // Branches that finished before the abort still report.
            while let Some(joined) = set.join_next().await {
                if let Ok((position, result)) = joined {
                    results[position] = Some(result);
                }
            }

            let mut outputs = Vec::with_capacity(count);
            let mut errors = Vec::new();
            for result in results {
                match result {
                    Some(Ok(output)) => outputs.push(Some(output)),
                    Some(Err(err)) => {
                        outputs.push(None);
                        errors.push(err);
                    }
                    None => {
                        outputs.push(None);
                        errors.push(OperationError::Cancelled);
                    }
                }
            }

            if errors.is_empty() {
                return Ok(Value::Array(outputs.into_iter().flatten().collect()));
            }

            self.unwind(&outputs, foundry).await;

            if timed_out {
                let timeout = self.timeout.unwrap_or_default();
                tracing::warn!(group = %self.name, timeout_ms = timeout.as_millis() as u64, "parallel group timed out");
                Err(OperationError::Timeout(timeout))
            } else if cancel.is_cancelled() {
                Err(OperationError::Cancelled)
            } else {
                Err(OperationError::Aggregate(errors))
            }
        }
    }

    fn restore(
        &self,
        output: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), OperationError>> + Send {
        async move {
            let Value::Array(outputs) = output else {
                return Ok(());
            };
            let mut errors = Vec::new();
            for (branch, output) in self.branches.iter().zip(outputs).rev() {
                if let Err(err) = branch.restore_boxed(output, foundry, cancel).await {
                    errors.push(err);
                }
            }
            if errors.is_empty() {
                Ok(())
            } else {
                Err(OperationError::Aggregate(errors))
            }
        }
    }
}
