//! Per-run lifecycle status.

use serde::{Deserialize, Serialize};

/// Status of a single workflow run.
///
/// ```text
/// NotStarted -> Running -> Completed
///                       -> Failed -> Compensating -> Compensated
///                                                 -> CompensationFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    NotStarted,
    Running,
    Completed,
    Failed,
    Compensating,
    Compensated,
    CompensationFailed,
}

impl RunStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (NotStarted, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Failed, Compensating)
                | (Compensating, Compensated)
                | (Compensating, CompensationFailed)
        )
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Compensated | RunStatus::CompensationFailed
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Compensating => "compensating",
            RunStatus::Compensated => "compensated",
            RunStatus::CompensationFailed => "compensation_failed",
        };
        f.write_str(s)
    }
}
