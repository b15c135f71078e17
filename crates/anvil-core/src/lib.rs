//! Workflow orchestration engine for anvil.
//!
//! A [`Workflow`] is an ordered list of operations. [`Smith`] runs it
//! against a [`Foundry`] (the shared per-run context), wraps every operation
//! in the middleware chain, checkpoints progress into a [`SnapshotStore`],
//! and restores completed operations in reverse when the run fails.
//!
//! This crate depends only on `anvil-types`; durable stores, configuration
//! loading and tracing setup live in `anvil-infra` and `anvil-observe`.

pub mod clock;
pub mod event;
pub mod foundry;
pub mod middleware;
pub mod operation;
pub mod persistence;
pub mod resilience;
pub mod smith;
pub mod testing;
pub mod workflow;

pub use clock::{Clock, ManualClock, SystemClock};
pub use event::{EventHub, WorkflowEvent, WorkflowEventKind, WorkflowEventListener};
pub use foundry::Foundry;
pub use middleware::{Middleware, Next, OperationCall, Pipeline};
pub use operation::{BoxOperation, Operation, OperationError};
pub use persistence::{InMemorySnapshotStore, NoSnapshots, RecoveryCoordinator, RecoveryPolicy, SnapshotStore};
pub use smith::{ExecutionReport, ForgeError, Smith};
pub use workflow::{Workflow, WorkflowBuilder, WorkflowError};
