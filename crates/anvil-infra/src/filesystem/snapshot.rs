//! Snapshot store backed by one JSON file per execution.
//!
//! Files are named `<execution_id>_<workflow_id>.json`. Saves write a
//! sibling temp file and rename it over the target, so a crash mid-save
//! leaves either the old snapshot or the new one, never a torn file.

use std::path::{Path, PathBuf};

use anvil_core::persistence::SnapshotStore;
use anvil_types::error::PersistenceError;
use anvil_types::snapshot::ExecutionSnapshot;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    dir: PathBuf,
}

impl JsonFileSnapshotStore {
    /// Store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, execution_id: Uuid, workflow_id: Uuid) -> PathBuf {
        self.dir.join(format!("{execution_id}_{workflow_id}.json"))
    }
}

impl SnapshotStore for JsonFileSnapshotStore {
    async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        let path = self.path_for(snapshot.execution_id, snapshot.workflow_id);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::trace!(path = %path.display(), "snapshot written");
        Ok(())
    }

    async fn try_load(&self, execution_id: Uuid, workflow_id: Uuid) -> Result<Option<ExecutionSnapshot>, PersistenceError> {
        let path = self.path_for(execution_id, workflow_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let snapshot: ExecutionSnapshot = serde_json::from_slice(&bytes).map_err(|e| PersistenceError::Corrupt {
            execution_id,
            reason: format!("{}: {e}", path.display()),
        })?;
        if snapshot.key() != (execution_id, workflow_id) {
            return Err(PersistenceError::Corrupt {
                execution_id,
                reason: format!("{} holds the snapshot of another execution", path.display()),
            });
        }
        Ok(Some(snapshot))
    }

    async fn delete(&self, execution_id: Uuid, workflow_id: Uuid) -> Result<(), PersistenceError> {
        match tokio::fs::remove_file(self.path_for(execution_id, workflow_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use serde_json::json;
    use tempfile::TempDir;

    fn snapshot(exec: Uuid, wf: Uuid, next: usize) -> ExecutionSnapshot {
        ExecutionSnapshot::new(
            exec,
            wf,
            "checkout",
            next,
            HashMap::from([("order_id".to_string(), json!("A-17"))]),
        )
    }

    #[tokio::test]
    async fn save_load_delete() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileSnapshotStore::new(tmp.path().join("snapshots"));
        let (exec, wf) = (Uuid::now_v7(), Uuid::now_v7());

        assert!(store.try_load(exec, wf).await.unwrap().is_none());

        let saved = snapshot(exec, wf, 2);
        store.save(&saved).await.unwrap();
        let loaded = store.try_load(exec, wf).await.unwrap().unwrap();
        assert_eq!(loaded, saved);

        store.delete(exec, wf).await.unwrap();
        assert!(store.try_load(exec, wf).await.unwrap().is_none());
        store.delete(exec, wf).await.unwrap();
    }

    #[tokio::test]
    async fn save_overwrites_without_leaving_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileSnapshotStore::new(tmp.path());
        let (exec, wf) = (Uuid::now_v7(), Uuid::now_v7());

        store.save(&snapshot(exec, wf, 1)).await.unwrap();
        store.save(&snapshot(exec, wf, 3)).await.unwrap();

        let loaded = store.try_load(exec, wf).await.unwrap().unwrap();
        assert_eq!(loaded.next_operation_index, 3);

        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{exec}_{wf}.json")]);
    }

    #[tokio::test]
    async fn garbage_file_is_reported_as_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileSnapshotStore::new(tmp.path());
        let (exec, wf) = (Uuid::now_v7(), Uuid::now_v7());
        tokio::fs::write(tmp.path().join(format!("{exec}_{wf}.json")), "{ not json")
            .await
            .unwrap();

        let err = store.try_load(exec, wf).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt { execution_id, .. } if execution_id == exec));
    }
}
