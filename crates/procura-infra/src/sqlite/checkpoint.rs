//! SQLite checkpoint store implementation.
//!
//! Implements `CheckpointStore` from `procura-core`. Each checkpoint is one
//! row keyed by `(instance_id, sequence_number)`; the snapshot is stored as
//! a JSON blob. The compare-and-set runs inside a writer transaction, and
//! the primary key rejects a duplicate sequence even if two processes race
//! on the same database file.

use chrono::{DateTime, Utc};
use sqlx::Row;

use procura_core::repository::checkpoint::{CheckpointStore, next_sequence};
use procura_types::error::StoreError;
use procura_types::workflow::{Checkpoint, InstanceId, WorkflowInstance};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointStore`.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct CheckpointRow {
    instance_id: String,
    sequence_number: i64,
    parent_sequence_number: Option<i64>,
    snapshot: String,
    created_at: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            instance_id: row.try_get("instance_id")?,
            sequence_number: row.try_get("sequence_number")?,
            parent_sequence_number: row.try_get("parent_sequence_number")?,
            snapshot: row.try_get("snapshot")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, StoreError> {
        let snapshot: WorkflowInstance = serde_json::from_str(&self.snapshot)
            .map_err(|e| StoreError::Corrupt(format!("invalid snapshot JSON: {e}")))?;

        Ok(Checkpoint {
            instance_id: InstanceId::new(self.instance_id),
            sequence_number: self.sequence_number as u64,
            parent_sequence_number: self.parent_sequence_number.map(|s| s as u64),
            snapshot,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

const SELECT_COLUMNS: &str =
    "SELECT instance_id, sequence_number, parent_sequence_number, snapshot, created_at FROM workflow_checkpoints";

// ---------------------------------------------------------------------------
// CheckpointStore impl
// ---------------------------------------------------------------------------

impl CheckpointStore for SqliteCheckpointStore {
    async fn save(
        &self,
        instance_id: &InstanceId,
        snapshot: &WorkflowInstance,
        parent_sequence: Option<u64>,
    ) -> Result<u64, StoreError> {
        let sequence = next_sequence(parent_sequence);

        let mut stored = snapshot.clone();
        stored.sequence_number = sequence;
        let snapshot_json = serde_json::to_string(&stored)
            .map_err(|e| StoreError::Corrupt(format!("serialize snapshot: {e}")))?;
        let created_at = format_datetime(&Utc::now());

        let mut tx = self.pool.writer.begin().await.map_err(unavailable)?;

        let latest: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(sequence_number) FROM workflow_checkpoints WHERE instance_id = ?",
        )
        .bind(instance_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(unavailable)?;
        let latest = latest.map(|s| s as u64);

        if latest != parent_sequence {
            tracing::debug!(
                instance_id = %instance_id,
                expected = ?parent_sequence,
                actual = ?latest,
                "checkpoint compare-and-set rejected"
            );
            return Err(StoreError::ConcurrentModification {
                instance_id: instance_id.clone(),
                expected: parent_sequence,
                actual: latest,
            });
        }

        let result = sqlx::query(
            r#"INSERT INTO workflow_checkpoints
               (instance_id, sequence_number, parent_sequence_number, workflow_type, snapshot, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(instance_id.as_str())
        .bind(sequence as i64)
        .bind(parent_sequence.map(|s| s as i64))
        .bind(stored.workflow_type().as_str())
        .bind(&snapshot_json)
        .bind(&created_at)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(StoreError::ConcurrentModification {
                    instance_id: instance_id.clone(),
                    expected: parent_sequence,
                    actual: Some(sequence),
                });
            }
            Err(e) => return Err(unavailable(e)),
        }

        tx.commit().await.map_err(unavailable)?;
        Ok(sequence)
    }

    async fn load_latest(&self, instance_id: &InstanceId) -> Result<Checkpoint, StoreError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE instance_id = ? ORDER BY sequence_number DESC LIMIT 1"
        ))
        .bind(instance_id.as_str())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(unavailable)?;

        match row {
            Some(row) => CheckpointRow::from_row(&row)
                .map_err(unavailable)?
                .into_checkpoint(),
            None => Err(StoreError::NotFound {
                instance_id: instance_id.clone(),
                sequence: None,
            }),
        }
    }

    async fn load_at(
        &self,
        instance_id: &InstanceId,
        sequence: u64,
    ) -> Result<Checkpoint, StoreError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE instance_id = ? AND sequence_number = ?"
        ))
        .bind(instance_id.as_str())
        .bind(sequence as i64)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(unavailable)?;

        match row {
            Some(row) => CheckpointRow::from_row(&row)
                .map_err(unavailable)?
                .into_checkpoint(),
            None => Err(StoreError::NotFound {
                instance_id: instance_id.clone(),
                sequence: Some(sequence),
            }),
        }
    }

    async fn list(&self, instance_id: &InstanceId) -> Result<Vec<Checkpoint>, StoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE instance_id = ? ORDER BY sequence_number ASC"
        ))
        .bind(instance_id.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(unavailable)?;

        rows.iter()
            .map(|row| {
                CheckpointRow::from_row(row)
                    .map_err(unavailable)?
                    .into_checkpoint()
            })
            .collect()
    }
}
