//! Run status tracking with validated transitions.

use anvil_types::run::RunStatus;
use uuid::Uuid;

#[derive(Debug)]
pub(crate) struct RunState {
    execution_id: Uuid,
    status: RunStatus,
}

impl RunState {
    pub(crate) fn new(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            status: RunStatus::NotStarted,
        }
    }

    pub(crate) fn status(&self) -> RunStatus {
        self.status
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub(crate) fn advance(&mut self, next: RunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::error!(
                execution_id = %self.execution_id,
                from = %self.status,
                to = %next,
                "illegal run status transition"
            );
            debug_assert!(false, "illegal run status transition {} -> {}", self.status, next);
            return false;
        }
        tracing::trace!(execution_id = %self.execution_id, from = %self.status, to = %next, "run status");
        self.status = next;
        true
    }
}
