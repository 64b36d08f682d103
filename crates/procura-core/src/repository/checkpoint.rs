//! Checkpoint store trait definition.
//!
//! Checkpoints are immutable, append-only snapshots of a workflow instance.
//! The store is the single source of truth for "where is this instance":
//! the latest checkpoint (highest sequence number) is the current state.

use procura_types::error::StoreError;
use procura_types::workflow::{Checkpoint, InstanceId, WorkflowInstance};

/// Durable persistence of execution snapshots.
///
/// `save` is a compare-and-set on the latest sequence number of the
/// instance:
/// - `parent = None` creates sequence 0 and fails with
///   `StoreError::ConcurrentModification` if any checkpoint already exists.
/// - `parent = Some(n)` creates sequence `n + 1` and fails with
///   `StoreError::ConcurrentModification` unless `n` is the current latest.
///
/// Of two callers saving against the same parent, exactly one succeeds.
/// The stored snapshot's `sequence_number` is set to the assigned sequence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint and return its sequence number.
    fn save(
        &self,
        instance_id: &InstanceId,
        snapshot: &WorkflowInstance,
        parent_sequence: Option<u64>,
    ) -> impl std::future::Future<Output = Result<u64, StoreError>> + Send;

    /// Load the checkpoint with the highest sequence number.
    fn load_latest(
        &self,
        instance_id: &InstanceId,
    ) -> impl std::future::Future<Output = Result<Checkpoint, StoreError>> + Send;

    /// Load the checkpoint at a specific sequence number.
    fn load_at(
        &self,
        instance_id: &InstanceId,
        sequence: u64,
    ) -> impl std::future::Future<Output = Result<Checkpoint, StoreError>> + Send;

    /// All checkpoints of an instance ordered by sequence (empty if unknown).
    fn list(
        &self,
        instance_id: &InstanceId,
    ) -> impl std::future::Future<Output = Result<Vec<Checkpoint>, StoreError>> + Send;
}

/// Sequence number a save against `parent` must produce.
pub fn next_sequence(parent: Option<u64>) -> u64 {
    parent.map_or(0, |p| p + 1)
}
