//! Retry strategies and circuit breaking.
//!
//! Strategies plug in two ways: as middleware applied to every operation of
//! a run (`RetryMiddleware`, `CircuitBreakerMiddleware`), or around a single
//! operation (`ResilientOperation`).

pub mod backoff;
pub mod circuit_breaker;
pub mod middleware;
pub mod operation;
pub mod strategy;

pub use backoff::{
    ExponentialBackoffStrategy, FixedIntervalStrategy, RandomIntervalStrategy, build_strategy,
};
pub use circuit_breaker::{CircuitBreakerPolicy, CircuitState};
pub use middleware::{CircuitBreakerMiddleware, RetryMiddleware};
pub use operation::ResilientOperation;
pub use strategy::{
    ResilienceStrategy, RetryPolicy, RetryPredicate, StrategyError, execute_with_retry,
};
