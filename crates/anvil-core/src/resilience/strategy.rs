//! Retry contract and the retry driver.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::operation::OperationError;

/// Invalid strategy parameters.
#[derive(Debug, Error, PartialEq)]
pub enum StrategyError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("exponential multiplier must be greater than 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("random interval bounds are inverted: min {min:?} > max {max:?}")]
    InvertedInterval { min: Duration, max: Duration },
}

/// Caller-supplied filter deciding which errors are worth retrying.
pub type RetryPredicate = Arc<dyn Fn(&OperationError) -> bool + Send + Sync>;

/// Attempt budget plus optional predicate, shared by every strategy.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    predicate: Option<RetryPredicate>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Result<Self, StrategyError> {
        if max_attempts == 0 {
            return Err(StrategyError::ZeroAttempts);
        }
        Ok(Self {
            max_attempts,
            predicate: None,
        })
    }

    /// Only retry errors for which `predicate` returns true.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&OperationError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `attempt` is the 1-based attempt that just failed.
    pub fn should_retry(&self, attempt: u32, error: &OperationError) -> bool {
        if attempt >= self.max_attempts || error.is_cancellation() {
            return false;
        }
        self.predicate.as_ref().is_none_or(|p| p(error))
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Decides whether and when to retry a failed call.
///
/// Attempts are numbered from 1. `retry_delay(attempt)` is the wait before
/// `attempt` starts, so `retry_delay(1)` is always zero.
pub trait ResilienceStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn max_attempts(&self) -> u32;

    /// Whether to try again after `attempt` failed with `error`.
    fn should_retry(&self, attempt: u32, error: &OperationError) -> bool;

    fn retry_delay(&self, attempt: u32, error: &OperationError) -> Duration;
}

/// Run `call` until it succeeds or `strategy` gives up.
///
/// `call` receives the 1-based attempt number. On exhaustion the error from
/// the last attempt is returned unchanged. Cancellation is checked before
/// every attempt and interrupts the back-off sleep.
pub async fn execute_with_retry<S, F, Fut, T>(
    strategy: &S,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T, OperationError>
where
    S: ResilienceStrategy + ?Sized,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, OperationError>>,
{
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(OperationError::Cancelled);
        }

        let err = match call(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(strategy = strategy.name(), attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !strategy.should_retry(attempt, &err) {
            if attempt > 1 || attempt >= strategy.max_attempts() {
                tracing::warn!(
                    strategy = strategy.name(),
                    attempts = attempt,
                    error = %err,
                    "giving up after retries"
                );
            }
            return Err(err);
        }

        attempt += 1;
        let delay = strategy.retry_delay(attempt, &err);
        tracing::debug!(
            strategy = strategy.name(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after failure"
        );

        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(OperationError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
