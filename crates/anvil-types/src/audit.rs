//! Audit trail records produced by the audit middleware.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One audit record for an operation invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub execution_id: Uuid,
    pub operation_id: Uuid,
    pub operation_name: String,
    pub index: usize,
    pub outcome: AuditOutcome,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What happened to the audited invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Started,
    Succeeded,
    Failed,
}
