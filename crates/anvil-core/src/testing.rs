//! Test doubles for code built on anvil.
//!
//! `RecordingOperation` writes every `execute`/`restore` into a shared
//! [`Journal`], so a test can assert the exact interleaving across a whole
//! workflow. `RecordingListener` captures published events.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anvil_types::event::WorkflowEvent;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::WorkflowEventListener;
use crate::foundry::Foundry;
use crate::operation::{Operation, OperationError};

pub use crate::clock::ManualClock;

/// Ordered log shared by several recording operations.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Entries starting with `prefix`, e.g. `"execute:"`.
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Operation that journals `execute:<name>` and `restore:<name>`.
///
/// By default it succeeds, outputs its own name, and sets the property
/// `<name>` to `true`.
pub struct RecordingOperation {
    id: Uuid,
    name: String,
    journal: Journal,
    output: Option<Value>,
    failures_left: AtomicU32,
    fail_restore: bool,
}

impl RecordingOperation {
    pub fn new(name: impl Into<String>, journal: &Journal) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            journal: journal.clone(),
            output: None,
            failures_left: AtomicU32::new(0),
            fail_restore: false,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Fail every execution.
    pub fn failing(self) -> Self {
        self.failing_times(u32::MAX)
    }

    /// Fail the first `times` executions, then succeed.
    pub fn failing_times(self, times: u32) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn failing_restore(mut self) -> Self {
        self.fail_restore = true;
        self
    }
}

impl Operation for RecordingOperation {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_restore(&self) -> bool {
        true
    }

    fn execute(
        &self,
        _input: Value,
        foundry: &Foundry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Value, OperationError>> + Send {
        async move {
            if cancel.is_cancelled() {
                return Err(OperationError::Cancelled);
            }
            self.journal.record(format!("execute:{}", self.name));
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(OperationError::failed(format!("{} failed", self.name)));
            }
            foundry.set(self.name.clone(), Value::Bool(true));
            Ok(self
                .output
                .clone()
                .unwrap_or_else(|| Value::String(self.name.clone())))
        }
    }

    fn restore(
        &self,
        _output: Value,
        foundry: &Foundry,
        _cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), OperationError>> + Send {
        async move {
            self.journal.record(format!("restore:{}", self.name));
            if self.fail_restore {
                return Err(OperationError::failed(format!("{} restore failed", self.name)));
            }
            foundry.remove(&self.name);
            Ok(())
        }
    }
}

/// Listener that keeps every event it sees.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<WorkflowEvent>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.events().iter().map(WorkflowEvent::label).collect()
    }
}

impl WorkflowEventListener for RecordingListener {
    fn on_event(&self, event: &WorkflowEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_times_then_succeeds() {
        let journal = Journal::new();
        let op = RecordingOperation::new("flaky", &journal).failing_times(1);
        let foundry = Foundry::new();
        let cancel = CancellationToken::new();

        assert!(op.execute(Value::Null, &foundry, &cancel).await.is_err());
        let out = op.execute(Value::Null, &foundry, &cancel).await.unwrap();

        assert_eq!(out, Value::String("flaky".into()));
        assert_eq!(foundry.get("flaky"), Some(Value::Bool(true)));
        assert_eq!(journal.with_prefix("execute:").len(), 2);
    }

    #[tokio::test]
    async fn restore_removes_its_property() {
        let journal = Journal::new();
        let op = RecordingOperation::new("reserve", &journal);
        let foundry = Foundry::new();
        let cancel = CancellationToken::new();

        let out = op.execute(Value::Null, &foundry, &cancel).await.unwrap();
        op.restore(out, &foundry, &cancel).await.unwrap();

        assert!(!foundry.contains("reserve"));
        assert_eq!(journal.entries(), vec!["execute:reserve", "restore:reserve"]);
    }
}
