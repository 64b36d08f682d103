//! Projection store trait definition.
//!
//! The projection is the normalized business view of an instance (one
//! business record per instance plus an append-only transition log). It is
//! derived from checkpoints by the state synchronizer and never read by the
//! engine to make routing decisions.

use procura_types::error::RepositoryError;
use procura_types::workflow::{BusinessRecord, InstanceId, TransitionRecord};

/// Persistence adapter for business records and transition audit rows.
///
/// Both writes are idempotent:
/// - `upsert_record` only writes when the stored record is missing or its
///   `applied_sequence` is lower than the incoming one.
/// - `append_transition` is keyed by `(instance_id, sequence_number)`; a
///   repeated append is a no-op.
///
/// Each returns `true` when it actually changed storage.
pub trait ProjectionStore: Send + Sync {
    /// Insert or replace the business record (including approval rows).
    fn upsert_record(
        &self,
        record: &BusinessRecord,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Get the business record for an instance.
    fn get_record(
        &self,
        instance_id: &InstanceId,
    ) -> impl std::future::Future<Output = Result<Option<BusinessRecord>, RepositoryError>> + Send;

    /// Append one transition audit row.
    fn append_transition(
        &self,
        transition: &TransitionRecord,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Transition rows of an instance ordered by sequence number.
    fn list_transitions(
        &self,
        instance_id: &InstanceId,
    ) -> impl std::future::Future<Output = Result<Vec<TransitionRecord>, RepositoryError>> + Send;
}
