//! Per-operation execution timing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;

use super::{Middleware, Next, OperationCall};
use crate::operation::{Operation, OperationError};

/// One measured invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationTiming {
    pub operation: String,
    pub index: usize,
    pub duration: Duration,
    pub succeeded: bool,
}

/// Shared collector of timings. Cloning shares the underlying list.
#[derive(Debug, Clone, Default)]
pub struct OperationTimings {
    entries: Arc<Mutex<Vec<OperationTiming>>>,
}

impl OperationTimings {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, timing: OperationTiming) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(timing);
    }

    /// All timings recorded so far, in completion order.
    pub fn entries(&self) -> Vec<OperationTiming> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Sum of every recorded duration.
    pub fn total(&self) -> Duration {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|t| t.duration)
            .sum()
    }
}

/// Measures each operation with the foundry's clock and logs the result.
#[derive(Debug, Clone, Default)]
pub struct TimingMiddleware {
    timings: OperationTimings,
}

impl TimingMiddleware {
    pub fn new(timings: OperationTimings) -> Self {
        Self { timings }
    }

    pub fn timings(&self) -> &OperationTimings {
        &self.timings
    }
}

impl Middleware for TimingMiddleware {
    fn name(&self) -> &str {
        "timing"
    }

    fn handle<'a>(
        &'a self,
        call: OperationCall<'a>,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Value, OperationError>> {
        Box::pin(async move {
            let clock = call.foundry.clock().clone();
            let operation = call.operation.name().to_string();
            let index = call.index;
            let started = clock.now();

            let result = next.run(call).await;

            let duration = clock.now().saturating_duration_since(started);
            tracing::debug!(
                operation = %operation,
                index,
                duration_ms = duration.as_millis() as u64,
                succeeded = result.is_ok(),
                "operation timed"
            );
            self.timings.record(OperationTiming {
                operation,
                index,
                duration,
                succeeded: result.is_ok(),
            });
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::clock::ManualClock;
    use crate::foundry::Foundry;
    use crate::middleware::Pipeline;
    use crate::operation::{BoxOperation, DelegateOperation};

    #[tokio::test]
    async fn records_duration_from_foundry_clock() {
        let clock = ManualClock::new();
        let foundry = Foundry::new().with_clock(Arc::new(clock.clone()));
        let timings = OperationTimings::new();
        let pipeline = Pipeline::new(vec![Arc::new(TimingMiddleware::new(timings.clone()))]);

        let op = BoxOperation::new(DelegateOperation::new("slow", move |input, _foundry, _cancel| {
            let clock = clock.clone();
            async move {
                clock.advance(Duration::from_millis(40));
                Ok(input)
            }
        }));
        let cancel = CancellationToken::new();

        pipeline
            .execute(OperationCall::new(&op, &foundry, &cancel, json!(1), 3))
            .await
            .unwrap();

        let entries = timings.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "slow");
        assert_eq!(entries[0].index, 3);
        assert_eq!(entries[0].duration, Duration::from_millis(40));
        assert!(entries[0].succeeded);
        assert_eq!(timings.total(), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn failures_are_timed_and_propagated() {
        let timing = TimingMiddleware::default();
        let timings = timing.timings().clone();
        let pipeline = Pipeline::new(vec![Arc::new(timing)]);
        let op = BoxOperation::new(DelegateOperation::new("broken", |_input, _foundry, _cancel| async {
            Err(OperationError::failed("nope"))
        }));
        let foundry = Foundry::new();
        let cancel = CancellationToken::new();

        let err = pipeline
            .execute(OperationCall::new(&op, &foundry, &cancel, Value::Null, 0))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "nope");
        assert!(!timings.entries()[0].succeeded);
    }
}
