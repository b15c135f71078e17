use std::time::Duration;

use thiserror::Error;

/// Errors produced while executing or restoring a single operation.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The operation ran and reported a failure.
    #[error("{0}")]
    Failed(String),

    /// Cooperative cancellation was observed. Never retried.
    #[error("operation cancelled")]
    Cancelled,

    /// A circuit breaker rejected the call without invoking the operation.
    #[error("circuit '{circuit}' is open")]
    CircuitOpen { circuit: String },

    /// The operation (or parallel group) exceeded its time budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Input was rejected before the operation ran.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A property could not be read or written with the requested type.
    #[error("property error: {0}")]
    Property(String),

    /// Several independent failures (parallel branches, for-each items).
    #[error("{} operations failed: {}", .0.len(), join_messages(.0))]
    Aggregate(Vec<OperationError>),

    /// Anything raised by operation code through `?`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OperationError {
    /// Shorthand for `OperationError::Failed`.
    pub fn failed(message: impl Into<String>) -> Self {
        OperationError::Failed(message.into())
    }

    /// Whether this error represents cancellation, including an aggregate
    /// made only of cancellations.
    pub fn is_cancellation(&self) -> bool {
        match self {
            OperationError::Cancelled => true,
            OperationError::Aggregate(errors) => {
                !errors.is_empty() && errors.iter().all(OperationError::is_cancellation)
            }
            _ => false,
        }
    }

    /// Whether a circuit breaker produced this error.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, OperationError::CircuitOpen { .. })
    }
}

fn join_messages(errors: &[OperationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
