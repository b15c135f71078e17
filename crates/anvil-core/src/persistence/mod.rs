//! Checkpointing and resume.
//!
//! The orchestrator saves a snapshot after every completed operation through
//! [`CheckpointMiddleware`] and resumes from it on the next run with the same
//! `(execution_id, workflow_id)`. Durable stores live in `anvil-infra`.

pub mod checkpoint;
pub mod recovery;
pub mod store;

pub use anvil_types::error::PersistenceError;
pub use anvil_types::snapshot::ExecutionSnapshot;
pub use checkpoint::CheckpointMiddleware;
pub use recovery::{RecoveryCoordinator, RecoveryPolicy};
pub use store::{InMemorySnapshotStore, NoSnapshots, SnapshotStore};
