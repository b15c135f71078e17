//! Units of work and their compensation.
//!
//! `Operation` is the one capability set every step implements: forward
//! `execute` plus optional `restore`. Built-in kinds are free-standing
//! implementations rather than a hierarchy.
//!
//! Follows the same blanket-impl pattern used for other async traits here:
//! 1. `Operation` uses RPITIT (native async fn in traits)
//! 2. An object-safe `OperationDyn` with boxed futures is blanket-implemented
//!    for every `T: Operation`
//! 3. `BoxOperation` wraps `Arc<dyn OperationDyn>` so heterogeneous
//!    operations can live in one workflow

pub mod builtin;
pub mod error;
pub mod parallel;

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::foundry::Foundry;

pub use builtin::{
    ActionOperation, BRANCH_KEY_PREFIX, ConditionalOperation, DelayOperation, DelegateOperation,
    ForEachOperation, LogLevel, LoggingOperation,
};
pub use error::OperationError;
pub use parallel::ParallelOperation;

/// A unit of work with optional compensation.
///
/// `execute` may be called once per attempt when wrapped in a retry, so
/// idempotency across attempts is the implementor's responsibility.
/// `restore` must never fail merely because the operation has nothing to
/// undo: the default implementation is a no-op returning `Ok(())`.
pub trait Operation: Send + Sync {
    /// Stable identity of this operation instance.
    fn id(&self) -> Uuid;

    /// Human-readable name used in events, logs, and errors.
    fn name(&self) -> &str;

    /// Whether `restore` performs a real rollback.
    fn supports_restore(&self) -> bool {
        false
    }

    /// Run the operation against the shared foundry.
    fn execute(
        &self,
        input: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Value, OperationError>> + Send;

    /// Undo the effects of a successful `execute` that produced `output`.
    fn restore(
        &self,
        _output: Value,
        _foundry: &Foundry,
        _cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), OperationError>> + Send {
        async { Ok(()) }
    }
}

/// Object-safe version of [`Operation`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch. A blanket
/// implementation is provided for all types implementing `Operation`.
pub trait OperationDyn: Send + Sync {
    fn operation_id(&self) -> Uuid;

    fn operation_name(&self) -> &str;

    fn restorable(&self) -> bool;

    fn execute_boxed<'a>(
        &'a self,
        input: Value,
        foundry: &'a Foundry,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Value, OperationError>>;

    fn restore_boxed<'a>(
        &'a self,
        output: Value,
        foundry: &'a Foundry,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), OperationError>>;
}

impl<T: Operation> OperationDyn for T {
    fn operation_id(&self) -> Uuid {
        self.id()
    }

    fn operation_name(&self) -> &str {
        self.name()
    }

    fn restorable(&self) -> bool {
        self.supports_restore()
    }

    fn execute_boxed<'a>(
        &'a self,
        input: Value,
        foundry: &'a Foundry,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Value, OperationError>> {
        Box::pin(self.execute(input, foundry, cancel))
    }

    fn restore_boxed<'a>(
        &'a self,
        output: Value,
        foundry: &'a Foundry,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), OperationError>> {
        Box::pin(self.restore(output, foundry, cancel))
    }
}

/// Type-erased, cheaply clonable operation.
#[derive(Clone)]
pub struct BoxOperation {
    inner: Arc<dyn OperationDyn>,
}

impl BoxOperation {
    /// Wrap a concrete operation.
    pub fn new<T: Operation + 'static>(operation: T) -> Self {
        Self {
            inner: Arc::new(operation),
        }
    }

    pub(crate) fn execute_boxed<'a>(
        &'a self,
        input: Value,
        foundry: &'a Foundry,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Value, OperationError>> {
        self.inner.execute_boxed(input, foundry, cancel)
    }

    pub(crate) fn restore_boxed<'a>(
        &'a self,
        output: Value,
        foundry: &'a Foundry,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), OperationError>> {
        self.inner.restore_boxed(output, foundry, cancel)
    }
}

impl Operation for BoxOperation {
    fn id(&self) -> Uuid {
        self.inner.operation_id()
    }

    fn name(&self) -> &str {
        self.inner.operation_name()
    }

    fn supports_restore(&self) -> bool {
        self.inner.restorable()
    }

    fn execute(
        &self,
        input: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Value, OperationError>> + Send {
        async move { self.inner.execute_boxed(input, foundry, cancel).await }
    }

    fn restore(
        &self,
        output: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), OperationError>> + Send {
        async move { self.inner.restore_boxed(output, foundry, cancel).await }
    }
}

impl std::fmt::Debug for BoxOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxOperation")
            .field("id", &self.inner.operation_id())
            .field("name", &self.inner.operation_name())
            .field("supports_restore", &self.inner.restorable())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Doubler {
        id: Uuid,
    }

    impl Operation for Doubler {
        fn id(&self) -> Uuid {
            self.id
        }

        fn name(&self) -> &str {
            "doubler"
        }

        fn execute(
            &self,
            input: Value,
            _foundry: &Foundry,
            _cancel: &CancellationToken,
        ) -> impl Future<Output = Result<Value, OperationError>> + Send {
            async move {
                let n = input.as_i64().ok_or_else(|| OperationError::failed("not a number"))?;
                Ok(json!(n * 2))
            }
        }
    }

    #[tokio::test]
    async fn boxed_operation_delegates_to_inner() {
        let id = Uuid::now_v7();
        let op = BoxOperation::new(Doubler { id });
        let foundry = Foundry::new();
        let cancel = CancellationToken::new();

        assert_eq!(op.id(), id);
        assert_eq!(op.name(), "doubler");
        assert!(!op.supports_restore());

        let out = op.execute(json!(21), &foundry, &cancel).await.unwrap();
        assert_eq!(out, json!(42));
    }

    #[tokio::test]
    async fn default_restore_is_a_no_op() {
        let op = BoxOperation::new(Doubler { id: Uuid::now_v7() });
        let foundry = Foundry::new();
        foundry.set("untouched", json!(1));

        op.restore(json!(42), &foundry, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(foundry.properties().len(), 1);
        assert_eq!(foundry.get("untouched"), Some(json!(1)));
    }

    #[tokio::test]
    async fn boxed_operation_can_be_boxed_again() {
        let id = Uuid::now_v7();
        let nested = BoxOperation::new(BoxOperation::new(Doubler { id }));
        let cancel = CancellationToken::new();

        let out = {
            let foundry = Foundry::new();
            nested.execute(json!(5), &foundry, &cancel).await.unwrap()
        };

        assert_eq!(out, json!(10));
        assert_eq!(nested.id(), id);
        nested
            .restore(out, &Foundry::new(), &cancel)
            .await
            .unwrap();
    }

    #[test]
    fn debug_shows_name() {
        let op = BoxOperation::new(Doubler { id: Uuid::nil() });
        let debug = format!("{op:?}");
        assert!(debug.contains("doubler"));
    }
}
