//! Workflow lifecycle event distribution.

pub mod hub;

pub use anvil_types::event::{WorkflowEvent, WorkflowEventKind};
pub use hub::{EventHub, FnListener, WorkflowEventListener};
