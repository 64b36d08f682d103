//! SQLite projection store implementation.
//!
//! Implements `ProjectionStore` from `procura-core`. Business records live in
//! `workflow_instances` with their approval decisions normalized into
//! `workflow_approvals`; status changes are appended to
//! `workflow_transitions`.

use chrono::{DateTime, Utc};
use sqlx::Row;

use procura_core::repository::projection::ProjectionStore;
use procura_types::approval::{ApprovalRow, BranchDecision};
use procura_types::error::RepositoryError;
use procura_types::workflow::{
    BusinessRecord, InstanceId, NodeId, TransitionRecord, WorkflowStatus, WorkflowType,
};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ProjectionStore`.
#[derive(Clone)]
pub struct SqliteProjectionStore {
    pool: DatabasePool,
}

impl SqliteProjectionStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct RecordRow {
    instance_id: String,
    workflow_type: String,
    current_node: String,
    status: String,
    payload: String,
    derived: String,
    last_error: Option<String>,
    applied_sequence: i64,
    created_at: String,
    updated_at: String,
}

impl RecordRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            instance_id: row.try_get("instance_id")?,
            workflow_type: row.try_get("workflow_type")?,
            current_node: row.try_get("current_node")?,
            status: row.try_get("status")?,
            payload: row.try_get("payload")?,
            derived: row.try_get("derived")?,
            last_error: row.try_get("last_error")?,
            applied_sequence: row.try_get("applied_sequence")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_record(self, approvals: Vec<ApprovalRow>) -> Result<BusinessRecord, RepositoryError> {
        let workflow_type: WorkflowType = self
            .workflow_type
            .parse()
            .map_err(RepositoryError::Query)?;
        let status: WorkflowStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| RepositoryError::Query(format!("invalid payload JSON: {e}")))?;
        let derived = serde_json::from_str(&self.derived)
            .map_err(|e| RepositoryError::Query(format!("invalid derived JSON: {e}")))?;

        Ok(BusinessRecord {
            instance_id: InstanceId::new(self.instance_id),
            workflow_type,
            current_node: NodeId::new(self.current_node),
            status,
            payload,
            derived,
            approvals,
            last_error: self.last_error,
            applied_sequence: self.applied_sequence as u64,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct ApprovalDbRow {
    approval_type: String,
    decision: String,
    decided_by: Option<String>,
    comments: Option<String>,
    decided_at: Option<String>,
}

impl ApprovalDbRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            approval_type: row.try_get("approval_type")?,
            decision: row.try_get("decision")?,
            decided_by: row.try_get("decided_by")?,
            comments: row.try_get("comments")?,
            decided_at: row.try_get("decided_at")?,
        })
    }

    fn into_approval(self) -> Result<ApprovalRow, RepositoryError> {
        let decision: BranchDecision = self.decision.parse().map_err(RepositoryError::Query)?;
        let decided_at = self.decided_at.as_deref().map(parse_datetime).transpose()?;

        Ok(ApprovalRow {
            approval_type: self.approval_type,
            decision,
            decided_by: self.decided_by,
            comments: self.comments,
            decided_at,
        })
    }
}

struct TransitionRow {
    instance_id: String,
    sequence_number: i64,
    from_status: String,
    to_status: String,
    node_id: String,
    actor: Option<String>,
    reason: Option<String>,
    timestamp: String,
}

impl TransitionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            instance_id: row.try_get("instance_id")?,
            sequence_number: row.try_get("sequence_number")?,
            from_status: row.try_get("from_status")?,
            to_status: row.try_get("to_status")?,
            node_id: row.try_get("node_id")?,
            actor: row.try_get("actor")?,
            reason: row.try_get("reason")?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn into_transition(self) -> Result<TransitionRecord, RepositoryError> {
        Ok(TransitionRecord {
            instance_id: InstanceId::new(self.instance_id),
            sequence_number: self.sequence_number as u64,
            from_status: self.from_status.parse().map_err(RepositoryError::Query)?,
            to_status: self.to_status.parse().map_err(RepositoryError::Query)?,
            node_id: NodeId::new(self.node_id),
            actor: self.actor,
            reason: self.reason,
            timestamp: parse_datetime(&self.timestamp)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// ---------------------------------------------------------------------------
// ProjectionStore impl
// ---------------------------------------------------------------------------

impl ProjectionStore for SqliteProjectionStore {
    async fn upsert_record(&self, record: &BusinessRecord) -> Result<bool, RepositoryError> {
        let payload_json = serde_json::to_string(&record.payload)
            .map_err(|e| RepositoryError::Query(format!("serialize payload: {e}")))?;
        let derived_json = serde_json::to_string(&record.derived)
            .map_err(|e| RepositoryError::Query(format!("serialize derived: {e}")))?;

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // The WHERE clause turns a stale or repeated sync into a no-op.
        let result = sqlx::query(
            r#"INSERT INTO workflow_instances
               (instance_id, workflow_type, current_node, status, payload, derived, last_error,
                applied_sequence, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(instance_id) DO UPDATE SET
                 current_node = excluded.current_node,
                 status = excluded.status,
                 payload = excluded.payload,
                 derived = excluded.derived,
                 last_error = excluded.last_error,
                 applied_sequence = excluded.applied_sequence,
                 updated_at = excluded.updated_at
               WHERE excluded.applied_sequence > workflow_instances.applied_sequence"#,
        )
        .bind(record.instance_id.as_str())
        .bind(record.workflow_type.as_str())
        .bind(record.current_node.as_str())
        .bind(record.status.as_str())
        .bind(&payload_json)
        .bind(&derived_json)
        .bind(&record.last_error)
        .bind(record.applied_sequence as i64)
        .bind(format_datetime(&record.created_at))
        .bind(format_datetime(&record.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM workflow_approvals WHERE instance_id = ?")
            .bind(record.instance_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        for approval in &record.approvals {
            sqlx::query(
                r#"INSERT INTO workflow_approvals
                   (instance_id, approval_type, decision, decided_by, comments, decided_at)
                   VALUES (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(record.instance_id.as_str())
            .bind(&approval.approval_type)
            .bind(approval.decision.to_string())
            .bind(&approval.decided_by)
            .bind(&approval.comments)
            .bind(approval.decided_at.as_ref().map(format_datetime))
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(true)
    }

    async fn get_record(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<BusinessRecord>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT instance_id, workflow_type, current_node, status, payload, derived,
                      last_error, applied_sequence, created_at, updated_at
               FROM workflow_instances WHERE instance_id = ?"#,
        )
        .bind(instance_id.as_str())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let record_row =
            RecordRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;

        let approval_rows = sqlx::query(
            r#"SELECT approval_type, decision, decided_by, comments, decided_at
               FROM workflow_approvals WHERE instance_id = ? ORDER BY rowid ASC"#,
        )
        .bind(instance_id.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let approvals = approval_rows
            .iter()
            .map(|row| {
                ApprovalDbRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_approval()
            })
            .collect::<Result<Vec<_>, _>>()?;

        record_row.into_record(approvals).map(Some)
    }

    async fn append_transition(
        &self,
        transition: &TransitionRecord,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"INSERT INTO workflow_transitions
               (instance_id, sequence_number, from_status, to_status, node_id, actor, reason, timestamp)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(instance_id, sequence_number) DO NOTHING"#,
        )
        .bind(transition.instance_id.as_str())
        .bind(transition.sequence_number as i64)
        .bind(transition.from_status.as_str())
        .bind(transition.to_status.as_str())
        .bind(transition.node_id.as_str())
        .bind(transition.actor.as_deref())
        .bind(transition.reason.as_deref())
        .bind(format_datetime(&transition.timestamp))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_transitions(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<TransitionRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT instance_id, sequence_number, from_status, to_status, node_id, actor, reason,
                      timestamp
               FROM workflow_transitions WHERE instance_id = ? ORDER BY sequence_number ASC"#,
        )
        .bind(instance_id.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                TransitionRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_transition()
            })
            .collect()
    }
}
