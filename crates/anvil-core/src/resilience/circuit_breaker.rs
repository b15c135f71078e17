//! Circuit breaker.
//!
//! Tracks consecutive failures of a protected call. After `failure_threshold`
//! failures in a row the circuit opens and calls fail fast with
//! `OperationError::CircuitOpen` without touching the wrapped call. Once the
//! break duration has elapsed exactly one trial call is admitted: success
//! closes the circuit, failure reopens it.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anvil_types::config::CircuitBreakerSettings;

use crate::clock::{Clock, system_clock};
use crate::operation::OperationError;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation. Tracks consecutive failures toward the threshold.
    Closed { consecutive_failures: u32 },
    /// Failing fast until the break duration elapses.
    Open { opened_at: Instant },
    /// Probing: one trial call may be in flight.
    HalfOpen { trial_in_flight: bool },
}

/// What kind of call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

pub struct CircuitBreakerPolicy {
    name: String,
    failure_threshold: u32,
    break_duration: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<CircuitState>,
}

impl CircuitBreakerPolicy {
    pub fn new(name: impl Into<String>, failure_threshold: u32, break_duration: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            break_duration,
            clock: system_clock(),
            state: Mutex::new(CircuitState::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    pub fn from_settings(name: impl Into<String>, settings: &CircuitBreakerSettings) -> Self {
        Self::new(
            name,
            settings.failure_threshold,
            Duration::from_millis(settings.break_duration_ms),
        )
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, with an elapsed break reported as `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        let state = *self.lock();
        match state {
            CircuitState::Open { opened_at } if self.break_elapsed(opened_at) => {
                CircuitState::HalfOpen {
                    trial_in_flight: false,
                }
            }
            other => other,
        }
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        *self.lock() = CircuitState::Closed {
            consecutive_failures: 0,
        };
    }

    /// Run `call` under the breaker. Cancellation is neither a success nor a
    /// failure; a cancelled trial frees the half-open slot.
    pub async fn execute<F, T>(&self, call: F) -> Result<T, OperationError>
    where
        F: Future<Output = Result<T, OperationError>>,
    {
        let admission = self.try_acquire()?;
        let mut guard = AdmissionGuard {
            breaker: self,
            admission: Some(admission),
        };
        let result = call.await;
        guard.admission = None;
        match &result {
            Ok(_) => self.record_success(),
            Err(e) if e.is_cancellation() => self.release(admission),
            Err(_) => self.record_failure(),
        }
        result
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn break_elapsed(&self, opened_at: Instant) -> bool {
        self.clock.now().saturating_duration_since(opened_at) >= self.break_duration
    }

    fn open_error(&self) -> OperationError {
        OperationError::CircuitOpen {
            circuit: self.name.clone(),
        }
    }

    fn try_acquire(&self) -> Result<Admission, OperationError> {
        let mut state = self.lock();
        match *state {
            CircuitState::Closed { .. } => Ok(Admission::Normal),
            CircuitState::Open { opened_at } => {
                if self.break_elapsed(opened_at) {
                    *state = CircuitState::HalfOpen {
                        trial_in_flight: true,
                    };
                    tracing::info!(circuit = %self.name, "circuit half-open, admitting trial call");
                    Ok(Admission::Trial)
                } else {
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen {
                trial_in_flight: true,
            } => Err(self.open_error()),
            CircuitState::HalfOpen {
                trial_in_flight: false,
            } => {
                *state = CircuitState::HalfOpen {
                    trial_in_flight: true,
                };
                Ok(Admission::Trial)
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.lock();
        if !matches!(*state, CircuitState::Closed { .. }) {
            tracing::info!(circuit = %self.name, "circuit closed");
        }
        *state = CircuitState::Closed {
            consecutive_failures: 0,
        };
    }

    fn record_failure(&self) {
        let mut state = self.lock();
        match *state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let count = consecutive_failures + 1;
                if count >= self.failure_threshold {
                    *state = CircuitState::Open {
                        opened_at: self.clock.now(),
                    };
                    tracing::warn!(
                        circuit = %self.name,
                        failures = count,
                        break_ms = self.break_duration.as_millis() as u64,
                        "circuit opened"
                    );
                } else {
                    *state = CircuitState::Closed {
                        consecutive_failures: count,
                    };
                }
            }
            CircuitState::HalfOpen { .. } => {
                *state = CircuitState::Open {
                    opened_at: self.clock.now(),
                };
                tracing::warn!(circuit = %self.name, "trial call failed, circuit reopened");
            }
            CircuitState::Open { .. } => {}
        }
    }

    fn release(&self, admission: Admission) {
        if admission == Admission::Trial {
            let mut state = self.lock();
            if matches!(*state, CircuitState::HalfOpen { .. }) {
                *state = CircuitState::HalfOpen {
                    trial_in_flight: false,
                };
            }
        }
    }
}

/// Frees a half-open slot if the admitted call is dropped before it finishes.
struct AdmissionGuard<'a> {
    breaker: &'a CircuitBreakerPolicy,
    admission: Option<Admission>,
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take() {
            tracing::debug!(circuit = %self.breaker.name, "admitted call dropped before completion");
            self.breaker.release(admission);
        }
    }
}

impl std::fmt::Debug for CircuitBreakerPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerPolicy")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("break_duration", &self.break_duration)
            .field("state", &self.state())
            .finish()
    }
}
