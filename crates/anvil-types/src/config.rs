//! Runtime configuration types for anvil.
//!
//! `ForgeSettings` holds the named toggles the orchestrator reads at run time.
//! It is typically loaded from a `anvil.toml` file (see `anvil-infra`), but
//! any source that can produce the struct works. All fields have defaults.

use serde::{Deserialize, Serialize};

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgeSettings {
    /// Maximum workflows a single `Smith` runs at once (0 = unlimited).
    #[serde(default)]
    pub max_concurrent_workflows: usize,

    /// Run every operation even after failures and raise an aggregate at the end.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Stop the reverse compensation walk at the first restore failure.
    #[serde(default)]
    pub fail_fast_compensation: bool,

    /// Raise collected restore failures as an error after compensation.
    #[serde(default)]
    pub throw_on_compensation_error: bool,

    /// Feed each operation's output into the next operation's input.
    #[serde(default = "default_true")]
    pub enable_output_chaining: bool,

    /// Retry applied to every operation through middleware (None = no retry).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySettings>,

    /// Circuit breaker applied to every operation through middleware.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerSettings>,

    /// Resume-with-retry budget used by the recovery coordinator.
    #[serde(default)]
    pub recovery: RecoverySettings,
}

fn default_true() -> bool {
    true
}

impl Default for ForgeSettings {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 0,
            continue_on_error: false,
            fail_fast_compensation: false,
            throw_on_compensation_error: false,
            enable_output_chaining: true,
            retry: None,
            circuit_breaker: None,
            recovery: RecoverySettings::default(),
        }
    }
}

/// Which delay family a retry strategy uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyKind {
    FixedInterval,
    ExponentialBackoff,
    RandomInterval,
}

/// Retry strategy configuration.
///
/// Only the fields relevant to `strategy` are read: `interval_ms` for fixed
/// interval; `base_delay_ms`, `multiplier`, `max_delay_ms`, `jitter` for
/// exponential backoff; `min_interval_ms`, `max_interval_ms` for random.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub strategy: RetryStrategyKind,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter: bool,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_interval_ms() -> u64 {
    1_000
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_min_interval_ms() -> u64 {
    100
}
fn default_max_interval_ms() -> u64 {
    1_000
}

impl RetrySettings {
    /// Settings for the given strategy with every other field defaulted.
    pub fn new(strategy: RetryStrategyKind) -> Self {
        Self {
            strategy,
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: false,
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit (default 5).
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a trial call (default 30s).
    #[serde(default = "default_break_duration_ms")]
    pub break_duration_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_break_duration_ms() -> u64 {
    30_000
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            break_duration_ms: default_break_duration_ms(),
        }
    }
}

/// Recovery (resume-with-retry) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySettings {
    /// Total resume attempts, including the first run (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(default = "default_recovery_delay_ms")]
    pub base_delay_ms: u64,
    /// Grow the delay exponentially (x2 per attempt) instead of keeping it fixed.
    #[serde(default)]
    pub exponential: bool,
    /// Upper bound for exponential delays.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_recovery_delay_ms() -> u64 {
    1_000
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_recovery_delay_ms(),
            exponential: false,
            max_delay_ms: default_max_delay_ms(),
        }
    }
}
