//! SQLite snapshot store.
//!
//! Implements `SnapshotStore` from `anvil-core` with split read/write pools.
//! The property map is stored as a JSON blob; timestamps as RFC 3339 text.

use std::collections::HashMap;

use anvil_core::persistence::SnapshotStore;
use anvil_types::error::PersistenceError;
use anvil_types::snapshot::ExecutionSnapshot;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `SnapshotStore`.
#[derive(Clone)]
pub struct SqliteSnapshotStore {
    pool: DatabasePool,
}

impl SqliteSnapshotStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Number of stored snapshots, e.g. executions awaiting resume.
    pub async fn count(&self) -> Result<u64, PersistenceError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM execution_snapshots")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_error)?;
        let n: i64 = row.try_get("n").map_err(query_error)?;
        Ok(n.max(0) as u64)
    }
}

struct SnapshotRow {
    execution_id: String,
    workflow_id: String,
    workflow_name: String,
    next_operation_index: i64,
    properties: String,
    saved_at: String,
}

impl SnapshotRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            execution_id: row.try_get("execution_id")?,
            workflow_id: row.try_get("workflow_id")?,
            workflow_name: row.try_get("workflow_name")?,
            next_operation_index: row.try_get("next_operation_index")?,
            properties: row.try_get("properties")?,
            saved_at: row.try_get("saved_at")?,
        })
    }

    fn into_snapshot(self, execution_id: Uuid) -> Result<ExecutionSnapshot, PersistenceError> {
        let corrupt = |reason: String| PersistenceError::Corrupt { execution_id, reason };

        let next_operation_index = usize::try_from(self.next_operation_index)
            .map_err(|_| corrupt(format!("invalid next_operation_index: {}", self.next_operation_index)))?;
        let properties: HashMap<String, Value> = serde_json::from_str(&self.properties)
            .map_err(|e| corrupt(format!("invalid properties JSON: {e}")))?;
        let saved_at = DateTime::parse_from_rfc3339(&self.saved_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("invalid saved_at: {e}")))?;

        Ok(ExecutionSnapshot {
            execution_id: parse_uuid(&self.execution_id).map_err(&corrupt)?,
            workflow_id: parse_uuid(&self.workflow_id).map_err(&corrupt)?,
            workflow_name: self.workflow_name,
            next_operation_index,
            properties,
            saved_at,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, String> {
    Uuid::parse_str(s).map_err(|e| format!("invalid UUID '{s}': {e}"))
}

fn query_error(e: sqlx::Error) -> PersistenceError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PersistenceError::Connection(e.to_string())
        }
        other => PersistenceError::Query(other.to_string()),
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<(), PersistenceError> {
        let properties = serde_json::to_string(&snapshot.properties)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        let next = i64::try_from(snapshot.next_operation_index)
            .map_err(|_| PersistenceError::Serialization("next_operation_index out of range".to_string()))?;

        sqlx::query(
            r#"INSERT INTO execution_snapshots
               (execution_id, workflow_id, workflow_name, next_operation_index, properties, saved_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (execution_id, workflow_id) DO UPDATE SET
                   workflow_name = excluded.workflow_name,
                   next_operation_index = excluded.next_operation_index,
                   properties = excluded.properties,
                   saved_at = excluded.saved_at"#,
        )
        .bind(snapshot.execution_id.to_string())
        .bind(snapshot.workflow_id.to_string())
        .bind(&snapshot.workflow_name)
        .bind(next)
        .bind(properties)
        .bind(snapshot.saved_at.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn try_load(&self, execution_id: Uuid, workflow_id: Uuid) -> Result<Option<ExecutionSnapshot>, PersistenceError> {
        let row = sqlx::query(
            r#"SELECT execution_id, workflow_id, workflow_name, next_operation_index, properties, saved_at
               FROM execution_snapshots
               WHERE execution_id = ? AND workflow_id = ?"#,
        )
        .bind(execution_id.to_string())
        .bind(workflow_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => {
                let row = SnapshotRow::from_row(&row).map_err(query_error)?;
                Ok(Some(row.into_snapshot(execution_id)?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, execution_id: Uuid, workflow_id: Uuid) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM execution_snapshots WHERE execution_id = ? AND workflow_id = ?")
            .bind(execution_id.to_string())
            .bind(workflow_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(())
    }
}
