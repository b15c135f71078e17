//! Built-in operation kinds.
//!
//! Each kind is a free-standing `Operation` implementation. Closures receive
//! owned handles (`Value`, a `Foundry` clone, a `CancellationToken` clone) so
//! the futures they return are `'static` and need no lifetime gymnastics.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{BoxOperation, Operation, OperationError};
use crate::foundry::Foundry;

type ExecuteFn =
    Arc<dyn Fn(Value, Foundry, CancellationToken) -> BoxFuture<'static, Result<Value, OperationError>> + Send + Sync>;
type RestoreFn =
    Arc<dyn Fn(Value, Foundry, CancellationToken) -> BoxFuture<'static, Result<(), OperationError>> + Send + Sync>;

// -- Delegate --

/// Operation backed by an async closure, with an optional compensating closure.
#[derive(Clone)]
pub struct DelegateOperation {
    id: Uuid,
    name: String,
    execute: ExecuteFn,
    restore: Option<RestoreFn>,
}

impl DelegateOperation {
    pub fn new<F, Fut>(name: impl Into<String>, execute: F) -> Self
    where
        F: Fn(Value, Foundry, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
    {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            execute: Arc::new(
                move |input: Value, foundry: Foundry, cancel: CancellationToken| -> BoxFuture<'static, Result<Value, OperationError>> {
                    Box::pin(execute(input, foundry, cancel))
                },
            ),
            restore: None,
        }
    }

    /// Attach compensation. The closure receives the output `execute` produced.
    pub fn with_restore<F, Fut>(mut self, restore: F) -> Self
    where
        F: Fn(Value, Foundry, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
    {
        self.restore = Some(Arc::new(
            move |output: Value, foundry: Foundry, cancel: CancellationToken| -> BoxFuture<'static, Result<(), OperationError>> {
                Box::pin(restore(output, foundry, cancel))
            },
        ));
        self
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }
}

impl Operation for DelegateOperation {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_restore(&self) -> bool {
        self.restore.is_some()
    }

    fn execute(
        &self,
        input: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Value, OperationError>> + Send {
        (self.execute)(input, foundry.clone(), cancel.clone())
    }

    fn restore(
        &self,
        output: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), OperationError>> + Send {
        let fut = self
            .restore
            .as_ref()
            .map(|restore| restore(output, foundry.clone(), cancel.clone()));
        async move {
            match fut {
                Some(fut) => fut.await,
                None => Ok(()),
            }
        }
    }
}

// -- Action --

/// Synchronous side effect on the foundry. The input passes through unchanged.
#[derive(Clone)]
pub struct ActionOperation {
    id: Uuid,
    name: String,
    action: Arc<dyn Fn(&Value, &Foundry) -> Result<(), OperationError> + Send + Sync>,
}

impl ActionOperation {
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&Value, &Foundry) -> Result<(), OperationError> + Send + Sync + 'static,
    {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            action: Arc::new(action),
        }
    }
}

impl Operation for ActionOperation {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        input: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Value, OperationError>> + Send {
        let result = if cancel.is_cancelled() {
            Err(OperationError::Cancelled)
        } else {
            (self.action)(&input, foundry).map(|()| input)
        };
        async move { result }
    }
}

// -- Conditional --

/// Prefix of the foundry key recording which branch a conditional took.
pub const BRANCH_KEY_PREFIX: &str = "anvil.branch.";

/// Runs `then` when the predicate holds, otherwise `otherwise` (if any).
///
/// The selected branch's output passes through unchanged; without an `else`
/// branch the input does. The branch taken (`then`, `else` or `none`) is kept
/// in the foundry under `anvil.branch.<operation id>` for `restore`.
#[derive(Clone)]
pub struct ConditionalOperation {
    id: Uuid,
    name: String,
    predicate: Arc<dyn Fn(&Value, &Foundry) -> bool + Send + Sync>,
    then: BoxOperation,
    otherwise: Option<BoxOperation>,
}

impl ConditionalOperation {
    pub fn new<P>(name: impl Into<String>, predicate: P, then: BoxOperation) -> Self
    where
        P: Fn(&Value, &Foundry) -> bool + Send + Sync + 'static,
    {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            predicate: Arc::new(predicate),
            then,
            otherwise: None,
        }
    }

    pub fn otherwise(mut self, operation: BoxOperation) -> Self {
        self.otherwise = Some(operation);
        self
    }

    fn branch_key(&self) -> String {
        format!("{BRANCH_KEY_PREFIX}{}", self.id)
    }
}

impl Operation for ConditionalOperation {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_restore(&self) -> bool {
        self.then.supports_restore()
            || self.otherwise.as_ref().is_some_and(|o| o.supports_restore())
    }

    fn execute(
        &self,
        input: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Value, OperationError>> + Send {
        let take_then = (self.predicate)(&input, foundry);
        let (branch, selected) = if take_then {
            ("then", Some(&self.then))
        } else {
            ("else", self.otherwise.as_ref())
        };
        tracing::debug!(operation = %self.name, branch, "condition evaluated");

        async move {
            let (branch, output) = match selected {
                Some(op) => (branch, op.execute_boxed(input, foundry, cancel).await?),
                None => ("none", input),
            };
            foundry.set(self.branch_key(), Value::from(branch));
            Ok(output)
        }
    }

    fn restore(
        &self,
        output: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), OperationError>> + Send {
        async move {
            let branch = foundry.get(&self.branch_key());
            let selected = match branch.as_ref().and_then(Value::as_str) {
                Some("then") => Some(&self.then),
                Some("else") => self.otherwise.as_ref(),
                _ => None,
            };
            if let Some(op) = selected {
                op.restore_boxed(output, foundry, cancel).await?;
            }
            foundry.remove(&self.branch_key());
            Ok(())
        }
    }
}

// -- For-each --

/// Applies one operation to every element of an input array, in order.
///
/// Output is the array of per-element outputs. If an element fails, elements
/// that already succeeded are restored (in reverse) before the error surfaces,
/// so a failed for-each leaves nothing half-done behind.
#[derive(Clone)]
pub struct ForEachOperation {
    id: Uuid,
    name: String,
    body: BoxOperation,
}

impl ForEachOperation {
    pub fn new(name: impl Into<String>, body: BoxOperation) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            body,
        }
    }
}

impl Operation for ForEachOperation {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_restore(&self) -> bool {
        self.body.supports_restore()
    }

    fn execute(
        &self,
        input: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Value, OperationError>> + Send {
        async move {
            let items = match input {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => {
                    return Err(OperationError::Validation(format!(
                        "for-each '{}' expects an array input, got {}",
                        self.name,
                        json_kind(&other)
                    )));
                }
            };

            let mut outputs = Vec::with_capacity(items.len());
            for (position, item) in items.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    self.unwind(outputs, foundry).await;
                    return Err(OperationError::Cancelled);
                }
                match self.body.execute_boxed(item, foundry, cancel).await {
                    Ok(output) => outputs.push(output),
                    Err(err) => {
                        tracing::warn!(operation = %self.name, position, error = %err, "for-each element failed");
                        self.unwind(outputs, foundry).await;
                        return Err(err);
                    }
                }
            }
            Ok(Value::Array(outputs))
        }
    }

    fn restore(
        &self,
        output: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), OperationError>> + Send {
        async move {
            let outputs = match output {
                Value::Array(outputs) => outputs,
                _ => return Ok(()),
            };
            let mut errors = Vec::new();
            for element in outputs.into_iter().rev() {
                if let Err(err) = self.body.restore_boxed(element, foundry, cancel).await {
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

impl ForEachOperation {
    async fn unwind(&self, outputs: Vec<Value>, foundry: &Foundry) {
        let cancel = CancellationToken::new();
        for element in outputs.into_iter().rev() {
            if let Err(err) = self.body.restore_boxed(element, foundry, &cancel).await {
                tracing::warn!(operation = %self.name, error = %err, "for-each unwind failed");
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// -- Delay --

/// Sleeps for a fixed duration, passing the input through. Cancellable.
#[derive(Debug, Clone)]
pub struct DelayOperation {
    id: Uuid,
    name: String,
    duration: Duration,
}

impl DelayOperation {
    pub fn new(duration: Duration) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: format!("delay {}ms", duration.as_millis()),
            duration,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Operation for DelayOperation {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        input: Value,
        _foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Value, OperationError>> + Send {
        let duration = self.duration;
        async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(OperationError::Cancelled),
                _ = tokio::time::sleep(duration) => Ok(input),
            }
        }
    }
}

// -- Logging --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Emits a message through `tracing` at the chosen level and passes the
/// input through.
#[derive(Debug, Clone)]
pub struct LoggingOperation {
    id: Uuid,
    name: String,
    message: String,
    level: LogLevel,
}

impl LoggingOperation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: "log".to_string(),
            message: message.into(),
            level: LogLevel::default(),
        }
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Operation for LoggingOperation {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        input: Value,
        foundry: &Foundry,
        _cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Value, OperationError>> + Send {
        let execution_id = foundry.execution_id();
        let message = self.message.as_str();
        match self.level {
            LogLevel::Trace => tracing::trace!(%execution_id, "{message}"),
            LogLevel::Debug => tracing::debug!(%execution_id, "{message}"),
            LogLevel::Info => tracing::info!(%execution_id, "{message}"),
            LogLevel::Warn => tracing::warn!(%execution_id, "{message}"),
            LogLevel::Error => tracing::error!(%execution_id, "{message}"),
        }
        async move { Ok(input) }
    }
}
