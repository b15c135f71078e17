//! Audit trail of operation invocations.
//!
//! `AuditMiddleware` emits an [`AuditEntry`] when an operation starts and
//! another when it succeeds or fails. Where entries end up is the sink's
//! business: `TracingAuditSink` logs them, `MemoryAuditSink` keeps them for
//! inspection.

use std::sync::{Arc, Mutex};

use anvil_types::audit::{AuditEntry, AuditOutcome};
use futures_util::future::BoxFuture;
use serde_json::Value;

use super::{Middleware, Next, OperationCall};
use crate::operation::{Operation, OperationError};

/// Destination for audit entries.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Writes entries as structured `tracing` events under the `anvil::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "anvil::audit",
            execution_id = %entry.execution_id,
            operation_id = %entry.operation_id,
            operation = %entry.operation_name,
            index = entry.index,
            outcome = ?entry.outcome,
            duration_ms = entry.duration_ms,
            error = entry.error.as_deref(),
            "audit"
        );
    }
}

/// Keeps entries in memory. Cloning shares the list.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }
}

pub struct AuditMiddleware {
    sink: Arc<dyn AuditSink>,
}

impl AuditMiddleware {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }
}

impl Middleware for AuditMiddleware {
    fn name(&self) -> &str {
        "audit"
    }

    fn handle<'a>(
        &'a self,
        call: OperationCall<'a>,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Value, OperationError>> {
        Box::pin(async move {
            let foundry = call.foundry;
            let clock = foundry.clock().clone();
            let entry = |outcome: AuditOutcome, duration_ms: Option<u64>, error: Option<String>| AuditEntry {
                execution_id: foundry.execution_id(),
                operation_id: call.operation.id(),
                operation_name: call.operation.name().to_string(),
                index: call.index,
                outcome,
                timestamp: clock.utc_now(),
                duration_ms,
                error,
            };

            self.sink.record(entry(AuditOutcome::Started, None, None));
            let started = clock.now();

            let result = next.run(call.clone()).await;

            let elapsed = clock.now().saturating_duration_since(started).as_millis() as u64;
            match &result {
                Ok(_) => self.sink.record(entry(AuditOutcome::Succeeded, Some(elapsed), None)),
                Err(e) => self
                    .sink
                    .record(entry(AuditOutcome::Failed, Some(elapsed), Some(e.to_string()))),
            }
            result
        })
    }
}
