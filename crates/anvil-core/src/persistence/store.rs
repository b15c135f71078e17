//! Snapshot store contract and in-process implementations.
//!
//! Uses RPITIT (native async fn in traits) with explicit `Send` bounds.
//! Durable backends live in `anvil-infra`.

use std::future::Future;
use std::sync::Arc;

use anvil_types::error::PersistenceError;
use anvil_types::snapshot::ExecutionSnapshot;
use dashmap::DashMap;
use uuid::Uuid;

/// Opaque durable key/value store for execution snapshots, keyed by
/// `(execution_id, workflow_id)`.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Insert or overwrite the snapshot for its key.
    fn save(&self, snapshot: &ExecutionSnapshot) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    fn try_load(
        &self,
        execution_id: Uuid,
        workflow_id: Uuid,
    ) -> impl Future<Output = Result<Option<ExecutionSnapshot>, PersistenceError>> + Send;

    /// Remove the snapshot. Deleting a missing key is not an error.
    fn delete(&self, execution_id: Uuid, workflow_id: Uuid) -> impl Future<Output = Result<(), PersistenceError>> + Send;
}

/// Store that keeps nothing. The default for runs without persistence.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSnapshots;

impl SnapshotStore for NoSnapshots {
    async fn save(&self, _snapshot: &ExecutionSnapshot) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn try_load(&self, _execution_id: Uuid, _workflow_id: Uuid) -> Result<Option<ExecutionSnapshot>, PersistenceError> {
        Ok(None)
    }

    async fn delete(&self, _execution_id: Uuid, _workflow_id: Uuid) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Process-local store. Cloning shares the underlying map, so a test can
/// keep a handle after giving one to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<DashMap<(Uuid, Uuid), ExecutionSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Synchronous peek, mostly for assertions.
    pub fn get(&self, execution_id: Uuid, workflow_id: Uuid) -> Option<ExecutionSnapshot> {
        self.snapshots
            .get(&(execution_id, workflow_id))
            .map(|r| r.value().clone())
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<(), PersistenceError> {
        self.snapshots.insert(snapshot.key(), snapshot.clone());
        Ok(())
    }

    async fn try_load(&self, execution_id: Uuid, workflow_id: Uuid) -> Result<Option<ExecutionSnapshot>, PersistenceError> {
        Ok(self.get(execution_id, workflow_id))
    }

    async fn delete(&self, execution_id: Uuid, workflow_id: Uuid) -> Result<(), PersistenceError> {
        self.snapshots.remove(&(execution_id, workflow_id));
        Ok(())
    }
}

impl<S: SnapshotStore> SnapshotStore for Arc<S> {
    fn save(&self, snapshot: &ExecutionSnapshot) -> impl Future<Output = Result<(), PersistenceError>> + Send {
        self.as_ref().save(snapshot)
    }

    fn try_load(
        &self,
        execution_id: Uuid,
        workflow_id: Uuid,
    ) -> impl Future<Output = Result<Option<ExecutionSnapshot>, PersistenceError>> + Send {
        self.as_ref().try_load(execution_id, workflow_id)
    }

    fn delete(&self, execution_id: Uuid, workflow_id: Uuid) -> impl Future<Output = Result<(), PersistenceError>> + Send {
        self.as_ref().delete(execution_id, workflow_id)
    }
}
