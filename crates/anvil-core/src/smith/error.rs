use anvil_types::error::PersistenceError;
use uuid::Uuid;

use crate::operation::OperationError;
use crate::workflow::WorkflowError;

/// One operation that failed during the forward pass.
#[derive(Debug)]
pub struct OperationFailure {
    pub operation_id: Uuid,
    pub operation: String,
    pub index: usize,
    pub error: OperationError,
}

impl std::fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' (#{}): {}", self.operation, self.index, self.error)
    }
}

/// One `restore` call that failed during compensation.
#[derive(Debug)]
pub struct RestoreFailure {
    pub operation_id: Uuid,
    pub operation: String,
    pub index: usize,
    pub error: OperationError,
}

impl std::fmt::Display for RestoreFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "restore of '{}' (#{}): {}", self.operation, self.index, self.error)
    }
}

/// Outcome of a failed run.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    /// Bad workflow definition or settings. Never retried.
    #[error("configuration error: {0}")]
    Configuration(#[from] WorkflowError),

    /// Stop-on-first-error: the single causing failure.
    #[error("operation '{operation}' (#{index}) failed: {source}")]
    OperationFailed {
        operation: String,
        index: usize,
        #[source]
        source: OperationError,
    },

    /// Continue-on-error: every failure of the pass, in execution order.
    #[error("{} operations failed: {}", .0.len(), join(.0))]
    Aggregate(Vec<OperationFailure>),

    #[error("workflow execution cancelled")]
    Cancelled,

    /// Restore failures collected while compensating `cause`.
    #[error("{cause}; compensation then failed: {}", join(.failures))]
    CompensationFailed {
        cause: Box<ForgeError>,
        failures: Vec<RestoreFailure>,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("concurrency limit reached ({limit} workflows already running)")]
    ConcurrencyLimitReached { limit: usize },
}

impl ForgeError {
    /// Whether a later resume attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ForgeError::Configuration(_) | ForgeError::Cancelled => false,
            ForgeError::OperationFailed { source, .. } => !source.is_cancellation(),
            ForgeError::CompensationFailed { cause, .. } => cause.is_retryable(),
            ForgeError::Aggregate(_) | ForgeError::Persistence(_) | ForgeError::ConcurrencyLimitReached { .. } => true,
        }
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
