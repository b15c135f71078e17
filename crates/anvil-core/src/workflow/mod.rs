//! Immutable workflow definitions.
//!
//! A `Workflow` is an ordered list of operations plus metadata, built once
//! through `WorkflowBuilder` and validated at build time.

use std::collections::HashSet;

use thiserror::Error;
use uuid::Uuid;

use crate::operation::{BoxOperation, Operation};

/// Configuration errors. Never retried.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow '{0}' has no operations")]
    NoOperations(String),

    #[error("workflow '{workflow}' contains operation id {operation_id} more than once")]
    DuplicateOperationId { workflow: String, operation_id: Uuid },

    #[error("snapshot resumes at operation {index} but workflow '{workflow}' has only {operations}")]
    SnapshotOutOfRange {
        workflow: String,
        index: usize,
        operations: usize,
    },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// An ordered, immutable sequence of operations.
#[derive(Debug, Clone)]
pub struct Workflow {
    id: Uuid,
    name: String,
    version: String,
    description: Option<String>,
    operations: Vec<BoxOperation>,
}

impl Workflow {
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn operations(&self) -> &[BoxOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Always false for a built workflow; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Builder for [`Workflow`].
#[derive(Debug)]
pub struct WorkflowBuilder {
    id: Option<Uuid>,
    name: String,
    version: String,
    description: Option<String>,
    operations: Vec<BoxOperation>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            version: "1.0.0".to_string(),
            description: None,
            operations: Vec::new(),
        }
    }

    /// Fix the workflow id. Needed when snapshots must be found again after
    /// a process restart.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn add_operation<O: Operation + 'static>(mut self, operation: O) -> Self {
        self.operations.push(BoxOperation::new(operation));
        self
    }

    /// Add an already type-erased operation without wrapping it again.
    pub fn add_boxed(mut self, operation: BoxOperation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn build(self) -> Result<Workflow, WorkflowError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(WorkflowError::EmptyName);
        }
        if self.operations.is_empty() {
            return Err(WorkflowError::NoOperations(name));
        }

        let mut seen = HashSet::with_capacity(self.operations.len());
        for op in &self.operations {
            if !seen.insert(op.id()) {
                return Err(WorkflowError::DuplicateOperationId {
                    workflow: name,
                    operation_id: op.id(),
                });
            }
        }

        Ok(Workflow {
            id: self.id.unwrap_or_else(Uuid::now_v7),
            name,
            version: self.version,
            description: self.description,
            operations: self.operations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::operation::DelegateOperation;

    fn step(name: &str) -> DelegateOperation {
        DelegateOperation::new(name, |input, _f, _c| async move { Ok(input) })
    }

    #[test]
    fn build_preserves_declaration_order() {
        let workflow = WorkflowBuilder::new("checkout")
            .version("2.1.0")
            .description("reserve, charge, ship")
            .add_operation(step("reserve"))
            .add_operation(step("charge"))
            .add_operation(step("ship"))
            .build()
            .unwrap();

        let names: Vec<&str> = workflow.operations().iter().map(|o| o.name()).collect();
        assert_eq!(names, vec!["reserve", "charge", "ship"]);
        assert_eq!(workflow.version(), "2.1.0");
        assert_eq!(workflow.description(), Some("reserve, charge, ship"));
        assert_eq!(workflow.len(), 3);
        assert!(!workflow.is_empty());
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = WorkflowBuilder::new("   ")
            .add_operation(step("x"))
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::EmptyName));
    }

    #[test]
    fn empty_operation_list_is_rejected() {
        let err = Workflow::builder("nothing").build().unwrap_err();
        assert!(matches!(err, WorkflowError::NoOperations(ref n) if n == "nothing"));
    }

    #[test]
    fn duplicate_operation_instances_are_rejected() {
        let op = BoxOperation::new(step("twice"));
        let err = Workflow::builder("dup")
            .add_boxed(op.clone())
            .add_boxed(op)
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateOperationId { .. }));
    }

    #[test]
    fn explicit_id_is_kept() {
        let id = Uuid::now_v7();
        let a = Workflow::builder("a").with_id(id).add_operation(step("x")).build().unwrap();
        let b = Workflow::builder("b").add_operation(step("x")).build().unwrap();
        assert_eq!(a.id(), id);
        assert_ne!(b.id(), id);
    }
}
