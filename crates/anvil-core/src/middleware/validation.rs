//! Input validation ahead of execution.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use super::{Middleware, Next, OperationCall};
use crate::foundry::Foundry;
use crate::operation::{Operation, OperationError};

/// Checks an invocation before the operation runs.
pub trait Validator: Send + Sync {
    /// `Err(reason)` rejects the invocation.
    fn validate(&self, operation: &str, input: &Value, foundry: &Foundry) -> Result<(), String>;
}

impl<F> Validator for F
where
    F: Fn(&str, &Value, &Foundry) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, operation: &str, input: &Value, foundry: &Foundry) -> Result<(), String> {
        self(operation, input, foundry)
    }
}

/// Rejects the invocation unless every listed property is present.
#[derive(Debug, Clone)]
pub struct RequiredProperties {
    keys: Vec<String>,
}

impl RequiredProperties {
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for RequiredProperties {
    fn validate(&self, operation: &str, _input: &Value, foundry: &Foundry) -> Result<(), String> {
        let missing: Vec<&str> = self
            .keys
            .iter()
            .filter(|k| !foundry.contains(k))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "operation '{operation}' requires missing properties: {}",
                missing.join(", ")
            ))
        }
    }
}

/// Runs every validator in order; the first rejection becomes
/// `OperationError::Validation` and the operation is not invoked.
#[derive(Clone, Default)]
pub struct ValidationMiddleware {
    validators: Vec<Arc<dyn Validator>>,
}

impl ValidationMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }
}

impl Middleware for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    fn handle<'a>(
        &'a self,
        call: OperationCall<'a>,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Value, OperationError>> {
        Box::pin(async move {
            for validator in &self.validators {
                if let Err(reason) = validator.validate(call.operation.name(), &call.input, call.foundry) {
                    tracing::warn!(
                        operation = call.operation.name(),
                        index = call.index,
                        reason = %reason,
                        "validation rejected operation"
                    );
                    return Err(OperationError::Validation(reason));
                }
            }
            next.run(call).await
        })
    }
}
