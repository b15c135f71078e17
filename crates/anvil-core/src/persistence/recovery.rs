//! Retry-with-resume on top of checkpointing.
//!
//! Each attempt runs the workflow with compensation deferred, so a failed
//! attempt leaves its snapshot behind and the next attempt resumes after the
//! last completed operation. Only when the attempt budget is spent are the
//! checkpointed operations restored.

use std::time::Duration;

use anvil_types::config::RecoverySettings;
use tokio_util::sync::CancellationToken;

use super::store::{NoSnapshots, SnapshotStore};
use crate::foundry::Foundry;
use crate::resilience::backoff::exponential_delay;
use crate::smith::{CompensationMode, ExecutionReport, ForgeError, Smith};
use crate::workflow::Workflow;

/// How many times to resume and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    exponential: bool,
    max_delay: Duration,
}

impl RecoveryPolicy {
    /// Same delay before every resume.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            exponential: false,
            max_delay: delay,
        }
    }

    /// Delay doubling before every resume, capped at `max_delay`.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            exponential: true,
            max_delay,
        }
    }

    pub fn from_settings(settings: &RecoverySettings) -> Self {
        let base = Duration::from_millis(settings.base_delay_ms);
        if settings.exponential {
            Self::exponential(settings.max_attempts, base, Duration::from_millis(settings.max_delay_ms))
        } else {
            Self::fixed(settings.max_attempts, base)
        }
    }

    /// Total attempts, including the first run.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before the 1-based `attempt`. Always zero for the first.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        match attempt {
            0 | 1 => Duration::ZERO,
            _ if self.exponential => exponential_delay(self.base_delay, 2.0, self.max_delay, attempt),
            _ => self.base_delay,
        }
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::from_settings(&RecoverySettings::default())
    }
}

/// Drives a [`Smith`] through repeated resume attempts.
pub struct RecoveryCoordinator<S: SnapshotStore = NoSnapshots> {
    smith: Smith<S>,
    policy: RecoveryPolicy,
}

impl<S: SnapshotStore> RecoveryCoordinator<S> {
    pub fn new(smith: Smith<S>, policy: RecoveryPolicy) -> Self {
        Self { smith, policy }
    }

    /// Coordinator using the orchestrator's own `recovery` settings.
    pub fn from_settings(smith: Smith<S>) -> Self {
        let policy = RecoveryPolicy::from_settings(&smith.settings().recovery);
        Self::new(smith, policy)
    }

    pub fn smith(&self) -> &Smith<S> {
        &self.smith
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    pub async fn run(&self, workflow: &Workflow, foundry: &Foundry) -> Result<ExecutionReport, ForgeError> {
        self.run_with_cancel(workflow, foundry, &CancellationToken::new()).await
    }

    /// Run `workflow`, resuming from its checkpoint after each failure until
    /// it succeeds or the budget is spent. The error of the last attempt is
    /// returned, wrapped in `CompensationFailed` when restores fail and the
    /// orchestrator is configured to report them.
    pub async fn run_with_cancel(
        &self,
        workflow: &Workflow,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ForgeError> {
        let mut attempt = 1;
        loop {
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                tracing::debug!(
                    execution_id = %foundry.execution_id(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "waiting before resume"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(self
                            .smith
                            .compensate_checkpointed(workflow, foundry, ForgeError::Cancelled)
                            .await);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let err = match self
                .smith
                .run(workflow, foundry, cancel, CompensationMode::Deferred)
                .await
            {
                Ok(report) => {
                    if attempt > 1 {
                        tracing::info!(execution_id = %report.execution_id, attempt, "workflow recovered");
                    }
                    return Ok(report);
                }
                // Nothing ran, so nothing to restore.
                Err(err @ ForgeError::Configuration(_)) => return Err(err),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.policy.max_attempts() {
                tracing::warn!(
                    execution_id = %foundry.execution_id(),
                    workflow = %workflow.name(),
                    attempts = attempt,
                    error = %err,
                    "recovery exhausted, compensating"
                );
                return Err(self.smith.compensate_checkpointed(workflow, foundry, err).await);
            }

            tracing::warn!(
                execution_id = %foundry.execution_id(),
                attempt,
                max_attempts = self.policy.max_attempts(),
                error = %err,
                "attempt failed, will resume from checkpoint"
            );
            attempt += 1;
        }
    }
}

impl<S: SnapshotStore> Clone for RecoveryCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            smith: self.smith.clone(),
            policy: self.policy,
        }
    }
}

impl<S: SnapshotStore> std::fmt::Debug for RecoveryCoordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCoordinator")
            .field("smith", &self.smith)
            .field("policy", &self.policy)
            .finish()
    }
}
