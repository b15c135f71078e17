//! Delay families: fixed interval, exponential backoff, random interval.

use std::sync::Arc;
use std::time::Duration;

use anvil_types::config::{RetrySettings, RetryStrategyKind};
use rand::Rng;

use super::strategy::{ResilienceStrategy, RetryPolicy, StrategyError};
use crate::operation::OperationError;

/// `min(max, base * multiplier^(attempt-2))`, zero for the first attempt.
pub(crate) fn exponential_delay(base: Duration, multiplier: f64, max: Duration, attempt: u32) -> Duration {
    if attempt <= 1 || base.is_zero() {
        return Duration::ZERO;
    }
    let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
    let nanos = base.as_nanos() as f64 * multiplier.powi(exponent);
    let capped = nanos.min(max.as_nanos() as f64);
    Duration::from_nanos(capped as u64)
}

#[derive(Debug, Clone)]
pub struct FixedIntervalStrategy {
    policy: RetryPolicy,
    interval: Duration,
}

impl FixedIntervalStrategy {
    pub fn new(policy: RetryPolicy, interval: Duration) -> Self {
        Self { policy, interval }
    }
}

impl ResilienceStrategy for FixedIntervalStrategy {
    fn name(&self) -> &str {
        "fixed_interval"
    }

    fn max_attempts(&self) -> u32 {
        self.policy.max_attempts()
    }

    fn should_retry(&self, attempt: u32, error: &OperationError) -> bool {
        self.policy.should_retry(attempt, error)
    }

    fn retry_delay(&self, attempt: u32, _error: &OperationError) -> Duration {
        if attempt <= 1 { Duration::ZERO } else { self.interval }
    }
}

/// Exponential backoff with optional jitter.
///
/// Jitter scales the capped delay by a uniform factor in `[0.5, 1.5]` and
/// clamps the result to `[0, max_delay]`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoffStrategy {
    policy: RetryPolicy,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter: bool,
}

impl ExponentialBackoffStrategy {
    pub fn new(
        policy: RetryPolicy,
        base_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Result<Self, StrategyError> {
        if !multiplier.is_finite() || multiplier <= 1.0 {
            return Err(StrategyError::InvalidMultiplier(multiplier));
        }
        Ok(Self {
            policy,
            base_delay,
            multiplier,
            max_delay,
            jitter: false,
        })
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

impl ResilienceStrategy for ExponentialBackoffStrategy {
    fn name(&self) -> &str {
        "exponential_backoff"
    }

    fn max_attempts(&self) -> u32 {
        self.policy.max_attempts()
    }

    fn should_retry(&self, attempt: u32, error: &OperationError) -> bool {
        self.policy.should_retry(attempt, error)
    }

    fn retry_delay(&self, attempt: u32, _error: &OperationError) -> Duration {
        let delay = exponential_delay(self.base_delay, self.multiplier, self.max_delay, attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.5);
        delay.mul_f64(factor).min(self.max_delay)
    }
}

/// Uniformly random delay per attempt, used to spread out concurrent retriers.
#[derive(Debug, Clone)]
pub struct RandomIntervalStrategy {
    policy: RetryPolicy,
    min_interval: Duration,
    max_interval: Duration,
}

impl RandomIntervalStrategy {
    pub fn new(policy: RetryPolicy, min_interval: Duration, max_interval: Duration) -> Result<Self, StrategyError> {
        if min_interval > max_interval {
            return Err(StrategyError::InvertedInterval {
                min: min_interval,
                max: max_interval,
            });
        }
        Ok(Self {
            policy,
            min_interval,
            max_interval,
        })
    }
}

impl ResilienceStrategy for RandomIntervalStrategy {
    fn name(&self) -> &str {
        "random_interval"
    }

    fn max_attempts(&self) -> u32 {
        self.policy.max_attempts()
    }

    fn should_retry(&self, attempt: u32, error: &OperationError) -> bool {
        self.policy.should_retry(attempt, error)
    }

    fn retry_delay(&self, attempt: u32, _error: &OperationError) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let min = self.min_interval.as_millis() as u64;
        let max = self.max_interval.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Construct the strategy described by `settings`.
pub fn build_strategy(settings: &RetrySettings) -> Result<Arc<dyn ResilienceStrategy>, StrategyError> {
    let policy = RetryPolicy::new(settings.max_attempts)?;
    let strategy: Arc<dyn ResilienceStrategy> = match settings.strategy {
        RetryStrategyKind::FixedInterval => Arc::new(FixedIntervalStrategy::new(
            policy,
            Duration::from_millis(settings.interval_ms),
        )),
        RetryStrategyKind::ExponentialBackoff => Arc::new(
            ExponentialBackoffStrategy::new(
                policy,
                Duration::from_millis(settings.base_delay_ms),
                settings.multiplier,
                Duration::from_millis(settings.max_delay_ms),
            )?
            .with_jitter(settings.jitter),
        ),
        RetryStrategyKind::RandomInterval => Arc::new(RandomIntervalStrategy::new(
            policy,
            Duration::from_millis(settings.min_interval_ms),
            Duration::from_millis(settings.max_interval_ms),
        )?),
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err() -> OperationError {
        OperationError::failed("x")
    }

    fn exponential() -> ExponentialBackoffStrategy {
        ExponentialBackoffStrategy::new(
            RetryPolicy::new(10).unwrap(),
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(10),
        )
        .unwrap()
    }

    #[test]
    fn first_attempt_never_waits() {
        let fixed = FixedIntervalStrategy::new(RetryPolicy::new(3).unwrap(), Duration::from_secs(1));
        let random = RandomIntervalStrategy::new(
            RetryPolicy::new(3).unwrap(),
            Duration::from_millis(100),
            Duration::from_millis(200),
        )
        .unwrap();
        assert_eq!(fixed.retry_delay(1, &err()), Duration::ZERO);
        assert_eq!(exponential().retry_delay(1, &err()), Duration::ZERO);
        assert_eq!(exponential().with_jitter(true).retry_delay(1, &err()), Duration::ZERO);
        assert_eq!(random.retry_delay(1, &err()), Duration::ZERO);
    }

    #[test]
    fn fixed_interval_is_constant() {
        let fixed = FixedIntervalStrategy::new(RetryPolicy::new(3).unwrap(), Duration::from_millis(250));
        assert_eq!(fixed.retry_delay(2, &err()), Duration::from_millis(250));
        assert_eq!(fixed.retry_delay(7, &err()), Duration::from_millis(250));
    }

    #[test]
    fn exponential_doubles_then_caps() {
        let s = exponential();
        assert_eq!(s.retry_delay(2, &err()), Duration::from_millis(100));
        assert_eq!(s.retry_delay(3, &err()), Duration::from_millis(200));
        assert_eq!(s.retry_delay(4, &err()), Duration::from_millis(400));
        assert!(s.retry_delay(6, &err()) <= Duration::from_secs(10));
        assert_eq!(s.retry_delay(40, &err()), Duration::from_secs(10));
        assert_eq!(s.retry_delay(u32::MAX, &err()), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let s = exponential().with_jitter(true);
        for _ in 0..200 {
            let d = s.retry_delay(3, &err());
            assert!(d >= Duration::from_millis(99) && d <= Duration::from_millis(301), "{d:?}");
            assert!(s.retry_delay(30, &err()) <= Duration::from_secs(10));
        }
    }

    #[test]
    fn multiplier_must_exceed_one() {
        let result = ExponentialBackoffStrategy::new(
            RetryPolicy::new(3).unwrap(),
            Duration::from_millis(10),
            1.0,
            Duration::from_secs(1),
        );
        assert_eq!(result.unwrap_err(), StrategyError::InvalidMultiplier(1.0));
    }

    #[test]
    fn random_interval_draws_within_range() {
        let s = RandomIntervalStrategy::new(
            RetryPolicy::new(3).unwrap(),
            Duration::from_millis(100),
            Duration::from_millis(150),
        )
        .unwrap();
        for attempt in 2..100 {
            let d = s.retry_delay(attempt, &err());
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
        }
        assert!(
            RandomIntervalStrategy::new(
                RetryPolicy::new(3).unwrap(),
                Duration::from_millis(200),
                Duration::from_millis(100)
            )
            .is_err()
        );
    }

    #[test]
    fn build_from_settings() {
        let mut settings = RetrySettings::new(RetryStrategyKind::ExponentialBackoff);
        settings.max_attempts = 4;
        let strategy = build_strategy(&settings).unwrap();
        assert_eq!(strategy.name(), "exponential_backoff");
        assert_eq!(strategy.max_attempts(), 4);
        assert_eq!(strategy.retry_delay(2, &err()), Duration::from_millis(100));

        settings.multiplier = 0.5;
        assert!(build_strategy(&settings).is_err());

        let fixed = build_strategy(&RetrySettings::new(RetryStrategyKind::FixedInterval)).unwrap();
        assert_eq!(fixed.retry_delay(2, &err()), Duration::from_millis(1_000));
    }
}
