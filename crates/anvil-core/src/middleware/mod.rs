//! Decorator chain around operation execution.
//!
//! Middleware compose as `m1(m2(..mn(operation)))` in registration order.
//! Each link receives the call plus a [`Next`] handle for the remainder of
//! the chain and decides whether (and how often) to invoke it. A link that
//! does not call `next` must still return a result or an explicit error.
//!
//! The chain is an explicit slice walked by `Next::run`; no link knows about
//! any other.

pub mod audit;
pub mod timing;
pub mod validation;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::foundry::Foundry;
use crate::operation::{BoxOperation, OperationError};

pub use audit::{AuditMiddleware, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use timing::{OperationTiming, OperationTimings, TimingMiddleware};
pub use validation::{RequiredProperties, ValidationMiddleware, Validator};

/// One operation invocation travelling through the chain.
#[derive(Clone)]
pub struct OperationCall<'a> {
    pub operation: &'a BoxOperation,
    pub foundry: &'a Foundry,
    pub cancel: &'a CancellationToken,
    pub input: Value,
    /// Position of the operation in its workflow.
    pub index: usize,
}

impl<'a> OperationCall<'a> {
    pub fn new(
        operation: &'a BoxOperation,
        foundry: &'a Foundry,
        cancel: &'a CancellationToken,
        input: Value,
        index: usize,
    ) -> Self {
        Self {
            operation,
            foundry,
            cancel,
            input,
            index,
        }
    }
}

/// A wrapper adding cross-cutting behavior around execution.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    fn handle<'a>(
        &'a self,
        call: OperationCall<'a>,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Value, OperationError>>;
}

/// The remainder of the chain after the current link.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// Invoke the remaining links; the final link executes the operation.
    pub fn run(self, call: OperationCall<'a>) -> BoxFuture<'a, Result<Value, OperationError>> {
        match self.chain.split_first() {
            Some((head, rest)) => head.handle(call, Next { chain: rest }),
            None => {
                let OperationCall {
                    operation,
                    foundry,
                    cancel,
                    input,
                    ..
                } = call;
                operation.execute_boxed(input, foundry, cancel)
            }
        }
    }
}

/// An ordered, composed middleware chain.
#[derive(Clone, Default)]
pub struct Pipeline {
    links: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new(links: Vec<Arc<dyn Middleware>>) -> Self {
        Self { links }
    }

    /// Add an innermost link.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.links.push(middleware);
    }

    /// Add an outermost link.
    pub fn prepend(&mut self, middleware: Arc<dyn Middleware>) {
        self.links.insert(0, middleware);
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Link names, outermost first.
    pub fn names(&self) -> Vec<String> {
        self.links.iter().map(|m| m.name().to_string()).collect()
    }

    pub fn execute<'a>(&'a self, call: OperationCall<'a>) -> BoxFuture<'a, Result<Value, OperationError>> {
        Next { chain: &self.links }.run(call)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("links", &self.names()).finish()
    }
}
