//! Resilience as middleware.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use super::circuit_breaker::CircuitBreakerPolicy;
use super::strategy::{ResilienceStrategy, execute_with_retry};
use crate::middleware::{Middleware, Next, OperationCall};
use crate::operation::OperationError;

/// Re-runs the rest of the chain according to a strategy.
#[derive(Clone)]
pub struct RetryMiddleware {
    strategy: Arc<dyn ResilienceStrategy>,
}

impl RetryMiddleware {
    pub fn new(strategy: Arc<dyn ResilienceStrategy>) -> Self {
        Self { strategy }
    }
}

impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    fn handle<'a>(
        &'a self,
        call: OperationCall<'a>,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Value, OperationError>> {
        Box::pin(async move {
            let cancel = call.cancel;
            execute_with_retry(self.strategy.as_ref(), cancel, |_attempt| next.run(call.clone())).await
        })
    }
}

/// Guards the rest of the chain with a shared circuit breaker.
///
/// The breaker is shared by every operation the middleware wraps, so one
/// flaky dependency can trip the circuit for the whole workflow.
#[derive(Clone)]
pub struct CircuitBreakerMiddleware {
    breaker: Arc<CircuitBreakerPolicy>,
}

impl CircuitBreakerMiddleware {
    pub fn new(breaker: Arc<CircuitBreakerPolicy>) -> Self {
        Self { breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreakerPolicy> {
        &self.breaker
    }
}

impl Middleware for CircuitBreakerMiddleware {
    fn name(&self) -> &str {
        "circuit_breaker"
    }

    fn handle<'a>(
        &'a self,
        call: OperationCall<'a>,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Value, OperationError>> {
        Box::pin(self.breaker.execute(next.run(call)))
    }
}
