//! Shared domain types for anvil.
//!
//! This crate contains the types exchanged between the runtime core and its
//! collaborators: execution snapshots, lifecycle events, run status, audit
//! entries, settings, and the persistence error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod audit;
pub mod config;
pub mod error;
pub mod event;
pub mod run;
pub mod snapshot;

pub use audit::{AuditEntry, AuditOutcome};
pub use config::{
    CircuitBreakerSettings, ForgeSettings, RecoverySettings, RetrySettings, RetryStrategyKind,
};
pub use error::PersistenceError;
pub use event::{WorkflowEvent, WorkflowEventKind};
pub use run::RunStatus;
pub use snapshot::ExecutionSnapshot;
