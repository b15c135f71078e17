//! Resilience wrapped directly around one operation.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::circuit_breaker::CircuitBreakerPolicy;
use super::strategy::{ResilienceStrategy, execute_with_retry};
use crate::foundry::Foundry;
use crate::operation::{Operation, OperationError};

/// Decorates `O` with a retry strategy and/or circuit breaker.
///
/// Every retry attempt passes through the breaker, so an open circuit stops
/// the retries too. `restore` goes straight to the inner operation.
pub struct ResilientOperation<O> {
    inner: O,
    strategy: Option<Arc<dyn ResilienceStrategy>>,
    breaker: Option<Arc<CircuitBreakerPolicy>>,
}

impl<O: Operation> ResilientOperation<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            strategy: None,
            breaker: None,
        }
    }

    pub fn with_retry(mut self, strategy: Arc<dyn ResilienceStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreakerPolicy>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    async fn attempt(&self, input: Value, foundry: &Foundry, cancel: &CancellationToken) -> Result<Value, OperationError> {
        match &self.breaker {
            Some(breaker) => breaker.execute(self.inner.execute(input, foundry, cancel)).await,
            None => self.inner.execute(input, foundry, cancel).await,
        }
    }
}

impl<O: Operation> Operation for ResilientOperation<O> {
    fn id(&self) -> Uuid {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports_restore(&self) -> bool {
        self.inner.supports_restore()
    }

    fn execute(
        &self,
        input: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Value, OperationError>> + Send {
        async move {
            match &self.strategy {
                Some(strategy) => {
                    execute_with_retry(strategy.as_ref(), cancel, |_attempt| {
                        self.attempt(input.clone(), foundry, cancel)
                    })
                    .await
                }
                None => self.attempt(input, foundry, cancel).await,
            }
        }
    }

    fn restore(
        &self,
        output: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), OperationError>> + Send {
        self.inner.restore(output, foundry, cancel)
    }
}
