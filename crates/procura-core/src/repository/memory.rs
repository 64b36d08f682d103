//! In-memory store implementations.
//!
//! Backed by `DashMap`; the per-key entry lock serializes saves for one
//! instance, which gives the same compare-and-set guarantee as the SQLite
//! store. Used by tests and by ephemeral engines that need no durability.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use procura_types::error::{RepositoryError, StoreError};
use procura_types::workflow::{
    BusinessRecord, Checkpoint, InstanceId, TransitionRecord, WorkflowInstance,
};

use super::checkpoint::{CheckpointStore, next_sequence};
use super::projection::ProjectionStore;

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: DashMap<InstanceId, Vec<Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(
        &self,
        instance_id: &InstanceId,
        snapshot: &WorkflowInstance,
        parent_sequence: Option<u64>,
    ) -> Result<u64, StoreError> {
        let mut history = self.checkpoints.entry(instance_id.clone()).or_default();

        let latest = history.last().map(|c| c.sequence_number);
        if latest != parent_sequence {
            return Err(StoreError::ConcurrentModification {
                instance_id: instance_id.clone(),
                expected: parent_sequence,
                actual: latest,
            });
        }

        let sequence = next_sequence(parent_sequence);
        let mut snapshot = snapshot.clone();
        snapshot.sequence_number = sequence;
        history.push(Checkpoint {
            instance_id: instance_id.clone(),
            sequence_number: sequence,
            parent_sequence_number: parent_sequence,
            snapshot,
            created_at: Utc::now(),
        });

        Ok(sequence)
    }

    async fn load_latest(&self, instance_id: &InstanceId) -> Result<Checkpoint, StoreError> {
        self.checkpoints
            .get(instance_id)
            .and_then(|history| history.last().cloned())
            .ok_or_else(|| StoreError::NotFound {
                instance_id: instance_id.clone(),
                sequence: None,
            })
    }

    async fn load_at(
        &self,
        instance_id: &InstanceId,
        sequence: u64,
    ) -> Result<Checkpoint, StoreError> {
        self.checkpoints
            .get(instance_id)
            .and_then(|history| {
                history
                    .iter()
                    .find(|c| c.sequence_number == sequence)
                    .cloned()
            })
            .ok_or_else(|| StoreError::NotFound {
                instance_id: instance_id.clone(),
                sequence: Some(sequence),
            })
    }

    async fn list(&self, instance_id: &InstanceId) -> Result<Vec<Checkpoint>, StoreError> {
        Ok(self
            .checkpoints
            .get(instance_id)
            .map(|history| history.value().clone())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// In-memory business records and transition log.
///
/// Counts effective writes so tests can assert idempotency.
#[derive(Debug, Default)]
pub struct InMemoryProjectionStore {
    records: DashMap<InstanceId, BusinessRecord>,
    transitions: DashMap<InstanceId, BTreeMap<u64, TransitionRecord>>,
    record_writes: AtomicUsize,
    transition_appends: AtomicUsize,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of business record writes that changed storage.
    pub fn record_writes(&self) -> usize {
        self.record_writes.load(Ordering::SeqCst)
    }

    /// Number of transition appends that changed storage.
    pub fn transition_appends(&self) -> usize {
        self.transition_appends.load(Ordering::SeqCst)
    }
}

impl ProjectionStore for InMemoryProjectionStore {
    async fn upsert_record(&self, record: &BusinessRecord) -> Result<bool, RepositoryError> {
        let written = match self.records.entry(record.instance_id.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().applied_sequence >= record.applied_sequence {
                    false
                } else {
                    existing.insert(record.clone());
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record.clone());
                true
            }
        };
        if written {
            self.record_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(written)
    }

    async fn get_record(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<BusinessRecord>, RepositoryError> {
        Ok(self.records.get(instance_id).map(|r| r.value().clone()))
    }

    async fn append_transition(
        &self,
        transition: &TransitionRecord,
    ) -> Result<bool, RepositoryError> {
        let mut log = self
            .transitions
            .entry(transition.instance_id.clone())
            .or_default();
        if log.contains_key(&transition.sequence_number) {
            return Ok(false);
        }
        log.insert(transition.sequence_number, transition.clone());
        self.transition_appends.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn list_transitions(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<TransitionRecord>, RepositoryError> {
        Ok(self
            .transitions
            .get(instance_id)
            .map(|log| log.values().cloned().collect())
            .unwrap_or_default())
    }
}
