//! Durable workflow execution engine.
//!
//! The engine advances an instance node by node. Each step runs the current
//! node on a working copy, resolves the next position, commits a new
//! checkpoint against the previous sequence (compare-and-set), and mirrors
//! the step into the projection. Execution halts on arrival at an interrupt
//! node, when a node asks to wait, or at the end marker; the next `resume`
//! picks up from the latest checkpoint, possibly in another process.
//!
//! Generic over `C: CheckpointStore` and `P: ProjectionStore` so it works
//! with SQLite or the in-memory stores.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::Instrument;

use procura_types::approval::BranchDecision;
use procura_types::config::EngineSettings;
use procura_types::error::{BranchError, StoreError};
use procura_types::payload::WorkflowPayload;
use procura_types::workflow::{
    BusinessRecord, Checkpoint, InstanceId, TransitionRecord, WorkflowInstance, WorkflowType,
};

use crate::graph::{GraphDefinition, GraphError, NodeError, NodeOutcome};
use crate::repository::checkpoint::CheckpointStore;
use crate::repository::projection::ProjectionStore;
use crate::synchronizer::{StateSynchronizer, SyncError, SyncOutcome};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Another start/resume committed first. Nothing was persisted by this call.
    #[error("instance '{0}' was modified concurrently; retry later")]
    ConcurrentModification(InstanceId),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("approval branch '{branch}' was already decided ({decision})")]
    AlreadyDecided {
        branch: String,
        decision: BranchDecision,
    },

    #[error("unknown approval branch '{0}'")]
    UnknownBranch(String),

    /// The checkpoint committed but the projection did not. The next
    /// resume or reconcile re-drives the sync.
    #[error(
        "checkpoint {sequence} of instance '{instance_id}' committed but projection sync failed: {message}"
    )]
    PartialWrite {
        instance_id: InstanceId,
        sequence: u64,
        message: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("node '{node}' failed: {message}")]
    NodeFailed { node: String, message: String },

    #[error("instance '{instance_id}' exceeded {limit} steps in one call")]
    StepLimitExceeded { instance_id: InstanceId, limit: u32 },

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrentModification { instance_id, .. } => {
                EngineError::ConcurrentModification(instance_id)
            }
            StoreError::NotFound {
                instance_id,
                sequence: None,
            } => EngineError::NotFound(format!("workflow instance '{instance_id}'")),
            StoreError::NotFound {
                instance_id,
                sequence: Some(sequence),
            } => EngineError::NotFound(format!(
                "checkpoint {sequence} of workflow instance '{instance_id}'"
            )),
            other => EngineError::Store(other),
        }
    }
}

impl From<BranchError> for EngineError {
    fn from(err: BranchError) -> Self {
        match err {
            BranchError::UnknownBranch(branch) => EngineError::UnknownBranch(branch),
            BranchError::AlreadyDecided { branch, decision } => {
                EngineError::AlreadyDecided { branch, decision }
            }
            other => EngineError::InvalidInput(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

pub struct WorkflowEngine<C: CheckpointStore, P: ProjectionStore> {
    checkpoints: C,
    synchronizer: StateSynchronizer<P>,
    graphs: HashMap<WorkflowType, Arc<GraphDefinition>>,
    settings: EngineSettings,
}

impl<C: CheckpointStore, P: ProjectionStore> WorkflowEngine<C, P> {
    pub fn new(checkpoints: C, projections: P, settings: EngineSettings) -> Self {
        Self {
            checkpoints,
            synchronizer: StateSynchronizer::new(projections),
            graphs: HashMap::new(),
            settings,
        }
    }

    /// Register a compiled graph, replacing any graph of the same type.
    pub fn with_graph(mut self, graph: GraphDefinition) -> Self {
        self.graphs.insert(graph.workflow_type(), Arc::new(graph));
        self
    }

    pub fn with_graphs(self, graphs: impl IntoIterator<Item = GraphDefinition>) -> Self {
        graphs.into_iter().fold(self, Self::with_graph)
    }

    pub fn checkpoints(&self) -> &C {
        &self.checkpoints
    }

    pub fn projections(&self) -> &P {
        self.synchronizer.store()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn workflow_types(&self) -> Vec<WorkflowType> {
        let mut types: Vec<WorkflowType> = self.graphs.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    fn graph(&self, workflow_type: WorkflowType) -> Result<Arc<GraphDefinition>, EngineError> {
        self.graphs.get(&workflow_type).cloned().ok_or_else(|| {
            EngineError::InvalidState(format!(
                "no graph registered for workflow type '{workflow_type}'"
            ))
        })
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Create an instance at sequence 0 and run it until it halts.
    ///
    /// `instance_id` defaults to a generated UUIDv7. Starting an id that
    /// already has checkpoints fails with `InvalidState`.
    pub async fn start(
        &self,
        workflow_type: WorkflowType,
        instance_id: Option<InstanceId>,
        payload: &Value,
    ) -> Result<WorkflowInstance, EngineError> {
        let graph = self.graph(workflow_type)?;
        let instance_id = instance_id.unwrap_or_else(InstanceId::generate);
        let payload = WorkflowPayload::from_json(workflow_type, payload)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        match self.checkpoints.load_latest(&instance_id).await {
            Ok(_) => {
                return Err(EngineError::InvalidState(format!(
                    "workflow instance '{instance_id}' already exists"
                )));
            }
            Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let now = Utc::now();
        let mut instance = WorkflowInstance {
            instance_id: instance_id.clone(),
            current_node: graph.start_node().clone(),
            status: graph.initial_status(),
            payload,
            sequence_number: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
        };
        instance.sequence_number = self.checkpoints.save(&instance_id, &instance, None).await?;

        tracing::info!(
            instance_id = %instance_id,
            workflow_type = %workflow_type,
            status = %instance.status,
            "workflow instance created"
        );

        let start_node = instance.current_node.clone();
        self.synchronizer
            .apply_step(None, &start_node, &instance)
            .await
            .map_err(|e| partial_write(&instance, e))?;

        self.run(&graph, instance).await
    }

    /// Merge `input` into the payload and continue from the node the
    /// instance is parked at.
    pub async fn resume(
        &self,
        instance_id: &InstanceId,
        input: &Value,
    ) -> Result<WorkflowInstance, EngineError> {
        let latest = self.checkpoints.load_latest(instance_id).await?;
        self.redrive(&latest).await?;

        let mut instance = latest.snapshot;
        if instance.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "workflow instance '{instance_id}' is terminal ({})",
                instance.status
            )));
        }

        let graph = self.graph(instance.workflow_type())?;
        instance.payload = instance
            .payload
            .merged(input)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        tracing::info!(
            instance_id = %instance_id,
            sequence = instance.sequence_number,
            node = %instance.current_node,
            "resuming workflow instance"
        );

        self.run(&graph, instance).await
    }

    /// Snapshot of the latest checkpoint.
    pub async fn get_state(&self, instance_id: &InstanceId) -> Result<WorkflowInstance, EngineError> {
        Ok(self.checkpoints.load_latest(instance_id).await?.snapshot)
    }

    /// Re-drive the projection for the latest checkpoint without advancing.
    pub async fn reconcile(&self, instance_id: &InstanceId) -> Result<WorkflowInstance, EngineError> {
        let latest = self.checkpoints.load_latest(instance_id).await?;
        let outcome = self.redrive(&latest).await?;
        tracing::info!(
            instance_id = %instance_id,
            sequence = latest.sequence_number,
            ?outcome,
            "reconciled workflow instance"
        );
        Ok(latest.snapshot)
    }

    /// Audit trail of status changes ordered by sequence.
    pub async fn transitions(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<TransitionRecord>, EngineError> {
        self.checkpoints.load_latest(instance_id).await?;
        Ok(self.synchronizer.list_transitions(instance_id).await?)
    }

    /// Every checkpoint of the instance ordered by sequence.
    pub async fn history(&self, instance_id: &InstanceId) -> Result<Vec<Checkpoint>, EngineError> {
        let history = self.checkpoints.list(instance_id).await?;
        if history.is_empty() {
            return Err(EngineError::NotFound(format!(
                "workflow instance '{instance_id}'"
            )));
        }
        Ok(history)
    }

    pub async fn checkpoint_at(
        &self,
        instance_id: &InstanceId,
        sequence: u64,
    ) -> Result<Checkpoint, EngineError> {
        Ok(self.checkpoints.load_at(instance_id, sequence).await?)
    }

    /// The projected business record, if the projection has one.
    pub async fn business_record(
        &self,
        instance_id: &InstanceId,
    ) -> Result<BusinessRecord, EngineError> {
        self.synchronizer
            .record(instance_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("business record for '{instance_id}'")))
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Complete the projection for `checkpoint` if a crash left it behind.
    async fn redrive(&self, checkpoint: &Checkpoint) -> Result<SyncOutcome, EngineError> {
        let snapshot = &checkpoint.snapshot;
        let applied = self
            .synchronizer
            .is_applied(&checkpoint.instance_id, checkpoint.sequence_number)
            .await
            .map_err(|e| partial_write(snapshot, e))?;
        if applied {
            return Ok(SyncOutcome::AlreadyApplied);
        }

        tracing::warn!(
            instance_id = %checkpoint.instance_id,
            sequence = checkpoint.sequence_number,
            "projection behind latest checkpoint, re-driving sync"
        );

        let (previous_status, node_id) = match checkpoint.parent_sequence_number {
            Some(parent) => {
                let parent = self
                    .checkpoints
                    .load_at(&checkpoint.instance_id, parent)
                    .await?;
                (Some(parent.snapshot.status), parent.snapshot.current_node)
            }
            None => (None, snapshot.current_node.clone()),
        };

        self.synchronizer
            .apply_step(previous_status, &node_id, snapshot)
            .await
            .map_err(|e| partial_write(snapshot, e))
    }

    /// Execute nodes from the instance's current position until it halts.
    async fn run(
        &self,
        graph: &GraphDefinition,
        mut instance: WorkflowInstance,
    ) -> Result<WorkflowInstance, EngineError> {
        let timeout = Duration::from_secs(self.settings.node_timeout_secs);
        let mut steps = 0u32;

        while !instance.is_terminal() {
            if steps >= self.settings.max_steps_per_call {
                tracing::error!(
                    instance_id = %instance.instance_id,
                    sequence = instance.sequence_number,
                    limit = self.settings.max_steps_per_call,
                    "step limit exceeded"
                );
                return Err(EngineError::StepLimitExceeded {
                    instance_id: instance.instance_id.clone(),
                    limit: self.settings.max_steps_per_call,
                });
            }
            steps += 1;

            let node_id = instance.current_node.clone();
            let node = graph
                .node(&node_id)
                .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))?;

            let mut working = instance.clone();
            let span = tracing::debug_span!(
                "node",
                instance_id = %instance.instance_id,
                node = %node_id,
            );
            let result = tokio::time::timeout(timeout, node.handler().run(&mut working))
                .instrument(span)
                .await;

            let mut waited = false;
            let next_node = match result {
                Err(_) => {
                    return Err(EngineError::NodeFailed {
                        node: node_id.to_string(),
                        message: format!(
                            "timed out after {}s",
                            self.settings.node_timeout_secs
                        ),
                    });
                }
                Ok(Ok(NodeOutcome::Continue)) => graph.resolve_next(&node_id, &working)?.into_node_id(),
                Ok(Ok(NodeOutcome::Wait)) => {
                    waited = true;
                    node_id.clone()
                }
                Ok(Err(NodeError::Validation(reason))) => {
                    tracing::warn!(
                        instance_id = %instance.instance_id,
                        node = %node_id,
                        reason = %reason,
                        "node validation failed, rejecting"
                    );
                    working = instance.clone();
                    working.status = graph.rejection_status();
                    working.last_error = Some(reason);
                    node.on_reject().clone().into_node_id()
                }
                Ok(Err(NodeError::Branch(e))) => return Err(e.into()),
                Ok(Err(e)) => {
                    return Err(EngineError::NodeFailed {
                        node: node_id.to_string(),
                        message: e.to_string(),
                    });
                }
            };

            let previous_status = instance.status;
            working.current_node = next_node;
            working.updated_at = Utc::now();
            working.sequence_number = self
                .checkpoints
                .save(
                    &working.instance_id,
                    &working,
                    Some(instance.sequence_number),
                )
                .await?;

            tracing::debug!(
                instance_id = %working.instance_id,
                sequence = working.sequence_number,
                node = %node_id,
                next = %working.current_node,
                status = %working.status,
                "checkpoint committed"
            );

            self.synchronizer
                .apply_step(Some(previous_status), &node_id, &working)
                .await
                .map_err(|e| partial_write(&working, e))?;

            instance = working;
            if waited || graph.is_interrupt(&instance.current_node) {
                break;
            }
        }

        tracing::info!(
            instance_id = %instance.instance_id,
            sequence = instance.sequence_number,
            node = %instance.current_node,
            status = %instance.status,
            terminal = instance.is_terminal(),
            "workflow instance halted"
        );

        Ok(instance)
    }
}

fn partial_write(instance: &WorkflowInstance, err: SyncError) -> EngineError {
    tracing::error!(
        instance_id = %instance.instance_id,
        sequence = instance.sequence_number,
        error = %err,
        "projection sync failed after checkpoint commit"
    );
    EngineError::PartialWrite {
        instance_id: instance.instance_id.clone(),
        sequence: instance.sequence_number,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::sync::Barrier;

    use procura_types::config::EngineConfig;
    use procura_types::error::RepositoryError;
    use procura_types::payload::{RiskAssessment, VendorPayload};
    use procura_types::workflow::{NodeId, WorkflowStatus};

    use super::*;
    use crate::collaborator::{
        AssessmentError, BoxRiskAssessor, RiskAssessor, RuleBasedRiskAssessor,
    };
    use crate::graph::{FnNode, Next};
    use crate::repository::memory::{InMemoryCheckpointStore, InMemoryProjectionStore};
    use crate::workflows::{self, purchase_order, vendor_onboarding};

    type MemoryEngine = WorkflowEngine<InMemoryCheckpointStore, InMemoryProjectionStore>;

    fn engine() -> MemoryEngine {
        engine_with(
            InMemoryCheckpointStore::new(),
            InMemoryProjectionStore::new(),
            BoxRiskAssessor::new(RuleBasedRiskAssessor),
        )
    }

    fn engine_with<C: CheckpointStore, P: ProjectionStore>(
        checkpoints: C,
        projections: P,
        assessor: BoxRiskAssessor,
    ) -> WorkflowEngine<C, P> {
        let config = EngineConfig::default();
        let graphs = workflows::builtin_graphs(&config, assessor).unwrap();
        WorkflowEngine::new(checkpoints, projections, config.engine).with_graphs(graphs)
    }

    fn vendor() -> Value {
        json!({"name": "Acme", "taxId": "123", "category": "it"})
    }

    fn statuses(transitions: &[TransitionRecord]) -> Vec<(WorkflowStatus, WorkflowStatus)> {
        transitions
            .iter()
            .map(|t| (t.from_status, t.to_status))
            .collect()
    }

    // -- vendor onboarding -------------------------------------------------

    #[tokio::test]
    async fn start_halts_at_central_review() {
        let engine = engine();
        let state = engine
            .start(WorkflowType::VendorOnboarding, Some("v1".into()), &vendor())
            .await
            .unwrap();

        assert_eq!(state.status, WorkflowStatus::CentralPending);
        assert_eq!(state.current_node.as_str(), vendor_onboarding::CENTRAL_REVIEW);
        assert_eq!(state.sequence_number, 2);
        assert!(!state.is_terminal());
        let risk = state.payload.as_vendor().unwrap().risk_assessment.as_ref();
        assert!(risk.is_some());

        assert_eq!(engine.get_state(&"v1".into()).await.unwrap(), state);
        let record = engine.business_record(&"v1".into()).await.unwrap();
        assert_eq!(record.applied_sequence, 2);
        assert_eq!(record.status, WorkflowStatus::CentralPending);
    }

    #[tokio::test]
    async fn vendor_onboarding_happy_path() {
        let engine = engine();
        let id = InstanceId::new("v1");
        engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &vendor())
            .await
            .unwrap();

        let state = engine
            .resume(
                &id,
                &vendor_onboarding::central_decision_input(true, "alice", None),
            )
            .await
            .unwrap();
        assert_eq!(state.status, WorkflowStatus::DeptReview);
        assert_eq!(state.current_node.as_str(), vendor_onboarding::AGGREGATE);

        for (i, dept) in ["finance", "legal", "business"].iter().enumerate() {
            let state = engine
                .resume(
                    &id,
                    &vendor_onboarding::department_decision_input(dept, true, "bob", None),
                )
                .await
                .unwrap();
            if i < 2 {
                assert_eq!(state.status, WorkflowStatus::DeptReview);
                assert_eq!(state.current_node.as_str(), vendor_onboarding::AGGREGATE);
            } else {
                assert_eq!(state.status, WorkflowStatus::Approved);
                assert!(state.is_terminal());
            }
        }

        let transitions = engine.transitions(&id).await.unwrap();
        assert_eq!(
            statuses(&transitions),
            vec![
                (WorkflowStatus::Draft, WorkflowStatus::CentralPending),
                (WorkflowStatus::CentralPending, WorkflowStatus::DeptReview),
                (WorkflowStatus::DeptReview, WorkflowStatus::Approved),
            ]
        );
        let seqs: Vec<u64> = transitions.iter().map(|t| t.sequence_number).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(transitions[0].actor, None);
        assert_eq!(transitions[1].actor.as_deref(), Some("alice"));
        assert_eq!(transitions[2].actor.as_deref(), Some("bob"));

        let err = engine.resume(&id, &json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let record = engine.business_record(&id).await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Approved);
        assert_eq!(record.approvals.len(), 4);
    }

    #[tokio::test]
    async fn missing_tax_id_rejects_in_one_call() {
        let engine = engine();
        let id = InstanceId::new("v2");
        let state = engine
            .start(
                WorkflowType::VendorOnboarding,
                Some(id.clone()),
                &json!({"name": "Acme"}),
            )
            .await
            .unwrap();

        assert_eq!(state.status, WorkflowStatus::Rejected);
        assert!(state.is_terminal());
        assert!(state.last_error.as_deref().unwrap().contains("taxId"));

        let transitions = engine.transitions(&id).await.unwrap();
        assert_eq!(
            statuses(&transitions),
            vec![(WorkflowStatus::Draft, WorkflowStatus::Rejected)]
        );
        assert!(transitions[0].reason.as_deref().unwrap().contains("taxId"));
    }

    #[tokio::test]
    async fn central_rejection_ends_workflow() {
        let engine = engine();
        let id = InstanceId::new("v3");
        engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &vendor())
            .await
            .unwrap();

        let state = engine
            .resume(
                &id,
                &vendor_onboarding::central_decision_input(false, "alice", Some("blacklisted")),
            )
            .await
            .unwrap();
        assert_eq!(state.status, WorkflowStatus::Rejected);
        assert!(state.is_terminal());
    }

    #[tokio::test]
    async fn resume_without_decision_stays_parked() {
        let engine = engine();
        let id = InstanceId::new("v4");
        let started = engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &vendor())
            .await
            .unwrap();

        let state = engine
            .resume(&id, &json!({"contactEmail": "ops@acme.test"}))
            .await
            .unwrap();
        assert_eq!(state.current_node, started.current_node);
        assert_eq!(state.sequence_number, started.sequence_number + 1);
        assert_eq!(
            state.payload.as_vendor().unwrap().contact_email.as_deref(),
            Some("ops@acme.test")
        );
    }

    #[tokio::test]
    async fn department_veto_rejects_with_pending_branch() {
        let engine = engine();
        let id = InstanceId::new("v5");
        engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &vendor())
            .await
            .unwrap();
        engine
            .resume(&id, &vendor_onboarding::central_decision_input(true, "alice", None))
            .await
            .unwrap();
        engine
            .resume(
                &id,
                &vendor_onboarding::department_decision_input("finance", true, "bob", None),
            )
            .await
            .unwrap();
        let state = engine
            .resume(
                &id,
                &vendor_onboarding::department_decision_input("legal", false, "dan", None),
            )
            .await
            .unwrap();

        assert_eq!(state.status, WorkflowStatus::Rejected);
        assert!(state.is_terminal());
        let set = state
            .payload
            .as_vendor()
            .unwrap()
            .department_approvals
            .clone()
            .unwrap();
        assert_eq!(set.get("business").unwrap().decision, BranchDecision::Pending);
    }

    #[tokio::test]
    async fn branch_errors_write_no_checkpoint() {
        let engine = engine();
        let id = InstanceId::new("v6");
        engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &vendor())
            .await
            .unwrap();
        engine
            .resume(&id, &vendor_onboarding::central_decision_input(true, "alice", None))
            .await
            .unwrap();
        let before = engine.get_state(&id).await.unwrap();

        let err = engine
            .resume(
                &id,
                &vendor_onboarding::department_decision_input("security", true, "bob", None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownBranch(ref b) if b == "security"));
        assert_eq!(engine.get_state(&id).await.unwrap(), before);

        engine
            .resume(
                &id,
                &vendor_onboarding::department_decision_input("legal", true, "bob", None),
            )
            .await
            .unwrap();
        let err = engine
            .resume(
                &id,
                &vendor_onboarding::department_decision_input("legal", false, "eve", None),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::AlreadyDecided {
                decision: BranchDecision::Approved,
                ..
            }
        ));
    }

    // -- operations & errors -----------------------------------------------

    #[tokio::test]
    async fn start_rejects_existing_instance_and_bad_payload() {
        let engine = engine();
        let id = InstanceId::new("dup");
        engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &vendor())
            .await
            .unwrap();

        let err = engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &vendor())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let err = engine
            .start(WorkflowType::PurchaseOrder, None, &json!("not an object"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unknown_instance_is_not_found() {
        let engine = engine();
        let id = InstanceId::new("ghost");
        assert!(matches!(
            engine.resume(&id, &json!({})).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(engine.get_state(&id).await, Err(EngineError::NotFound(_))));
        assert!(matches!(engine.transitions(&id).await, Err(EngineError::NotFound(_))));
        assert!(matches!(engine.history(&id).await, Err(EngineError::NotFound(_))));
        assert!(matches!(
            engine.checkpoint_at(&id, 0).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_resume_input_persists_nothing() {
        let engine = engine();
        let id = InstanceId::new("v7");
        let started = engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &vendor())
            .await
            .unwrap();

        let err = engine
            .resume(&id, &json!({"centralApproval": "yes please"}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert_eq!(engine.get_state(&id).await.unwrap(), started);
    }

    #[tokio::test]
    async fn resume_cannot_forge_department_approvals() {
        let engine = engine();
        let id = InstanceId::new("v10");
        engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &vendor())
            .await
            .unwrap();
        let before = engine
            .resume(&id, &vendor_onboarding::central_decision_input(true, "alice", None))
            .await
            .unwrap();
        let checkpoints_before = engine.history(&id).await.unwrap().len();

        let all_approved: serde_json::Map<String, Value> = ["finance", "legal", "business"]
            .into_iter()
            .map(|k| (k.to_string(), json!({"branchKey": k, "decision": "approved"})))
            .collect();
        let err = engine
            .resume(&id, &json!({"departmentApprovals": all_approved}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(ref m) if m.contains("departmentApprovals")));

        let err = engine
            .resume(&id, &vendor_onboarding::central_decision_input(false, "mallory", None))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(ref m) if m.contains("centralApproval")));

        assert!(matches!(
            engine.resume(&id, &json!({"riskAssessment": {"score": 0}})).await,
            Err(EngineError::InvalidInput(_))
        ));

        assert_eq!(engine.get_state(&id).await.unwrap(), before);
        assert_eq!(engine.history(&id).await.unwrap().len(), checkpoints_before);
        assert_eq!(before.status, WorkflowStatus::DeptReview);
    }

    #[tokio::test]
    async fn start_rejects_precomputed_approval_level() {
        let engine = engine();
        let err = engine
            .start(
                WorkflowType::PurchaseOrder,
                Some("po-forged".into()),
                &json!({"poNumber": "PO-1", "vendorId": "v1", "amount": 5.0e6, "approvalLevel": "L1"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(matches!(
            engine.get_state(&"po-forged".into()).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn history_links_parents() {
        let engine = engine();
        let id = InstanceId::new("v8");
        engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &vendor())
            .await
            .unwrap();

        let history = engine.history(&id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].parent_sequence_number, None);
        for pair in history.windows(2) {
            assert_eq!(pair[1].parent_sequence_number, Some(pair[0].sequence_number));
        }
        let first = engine.checkpoint_at(&id, 0).await.unwrap();
        assert_eq!(first.snapshot.status, WorkflowStatus::Draft);
        assert_eq!(first.snapshot.current_node.as_str(), vendor_onboarding::VALIDATE);
    }

    // -- purchase orders ---------------------------------------------------

    #[tokio::test]
    async fn purchase_order_routes_by_amount() {
        let engine = engine();
        let cases = [
            (5_000.0, WorkflowStatus::PoL1, purchase_order::L1_REVIEW),
            (250_000.0, WorkflowStatus::PoL2, purchase_order::L2_REVIEW),
            (5_000_000.0, WorkflowStatus::PoL3, purchase_order::L3_REVIEW),
        ];
        for (i, (amount, status, node)) in cases.into_iter().enumerate() {
            let id = InstanceId::new(format!("po{i}"));
            let state = engine
                .start(
                    WorkflowType::PurchaseOrder,
                    Some(id.clone()),
                    &json!({"poNumber": format!("PO-{i}"), "vendorId": "v1", "amount": amount}),
                )
                .await
                .unwrap();
            assert_eq!(state.status, status);
            assert_eq!(state.current_node.as_str(), node);

            let state = engine
                .resume(&id, &purchase_order::level_decision_input(true, "erin", None))
                .await
                .unwrap();
            assert_eq!(state.status, WorkflowStatus::Approved);
            assert!(state.is_terminal());

            let transitions = engine.transitions(&id).await.unwrap();
            assert_eq!(
                statuses(&transitions),
                vec![
                    (WorkflowStatus::Draft, WorkflowStatus::ComplianceCheck),
                    (WorkflowStatus::ComplianceCheck, status),
                    (status, WorkflowStatus::Approved),
                ]
            );
        }
    }

    #[tokio::test]
    async fn purchase_order_with_bad_amount_is_rejected() {
        let engine = engine();
        let state = engine
            .start(
                WorkflowType::PurchaseOrder,
                None,
                &json!({"poNumber": "PO-1", "vendorId": "v1", "amount": -5.0}),
            )
            .await
            .unwrap();
        assert_eq!(state.status, WorkflowStatus::Rejected);
        assert!(state.last_error.is_some());
    }

    // -- concurrency & recovery --------------------------------------------

    /// Checkpoint store whose `load_latest` waits for a second caller once armed.
    struct RendezvousStore {
        inner: InMemoryCheckpointStore,
        barrier: Barrier,
        armed: AtomicBool,
    }

    impl CheckpointStore for RendezvousStore {
        async fn save(
            &self,
            instance_id: &InstanceId,
            snapshot: &WorkflowInstance,
            parent_sequence: Option<u64>,
        ) -> Result<u64, StoreError> {
            self.inner.save(instance_id, snapshot, parent_sequence).await
        }

        async fn load_latest(&self, instance_id: &InstanceId) -> Result<Checkpoint, StoreError> {
            let latest = self.inner.load_latest(instance_id).await;
            if self.armed.load(Ordering::SeqCst) {
                self.barrier.wait().await;
            }
            latest
        }

        async fn load_at(
            &self,
            instance_id: &InstanceId,
            sequence: u64,
        ) -> Result<Checkpoint, StoreError> {
            self.inner.load_at(instance_id, sequence).await
        }

        async fn list(&self, instance_id: &InstanceId) -> Result<Vec<Checkpoint>, StoreError> {
            self.inner.list(instance_id).await
        }
    }

    #[tokio::test]
    async fn concurrent_resumes_admit_exactly_one() {
        let store = RendezvousStore {
            inner: InMemoryCheckpointStore::new(),
            barrier: Barrier::new(2),
            armed: AtomicBool::new(false),
        };
        let engine = engine_with(
            store,
            InMemoryProjectionStore::new(),
            BoxRiskAssessor::new(RuleBasedRiskAssessor),
        );
        let id = InstanceId::new("race");
        engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &vendor())
            .await
            .unwrap();
        engine.checkpoints().armed.store(true, Ordering::SeqCst);

        let input = vendor_onboarding::central_decision_input(true, "alice", None);
        let (a, b) = tokio::join!(engine.resume(&id, &input), engine.resume(&id, &input));
        engine.checkpoints().armed.store(false, Ordering::SeqCst);

        let results = [a, b];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::ConcurrentModification(_))))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 1);

        let state = engine.get_state(&id).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::DeptReview);
        assert_eq!(engine.transitions(&id).await.unwrap().len(), 2);
    }

    /// Projection store that fails a configured number of record upserts
    /// and transition appends.
    #[derive(Default)]
    struct FlakyProjection {
        inner: InMemoryProjectionStore,
        failures: AtomicUsize,
        transition_failures: AtomicUsize,
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    impl ProjectionStore for FlakyProjection {
        async fn upsert_record(&self, record: &BusinessRecord) -> Result<bool, RepositoryError> {
            if take_failure(&self.failures) {
                return Err(RepositoryError::Query("injected failure".to_string()));
            }
            self.inner.upsert_record(record).await
        }

        async fn get_record(
            &self,
            instance_id: &InstanceId,
        ) -> Result<Option<BusinessRecord>, RepositoryError> {
            self.inner.get_record(instance_id).await
        }

        async fn append_transition(
            &self,
            transition: &TransitionRecord,
        ) -> Result<bool, RepositoryError> {
            if take_failure(&self.transition_failures) {
                return Err(RepositoryError::Query("injected failure".to_string()));
            }
            self.inner.append_transition(transition).await
        }

        async fn list_transitions(
            &self,
            instance_id: &InstanceId,
        ) -> Result<Vec<TransitionRecord>, RepositoryError> {
            self.inner.list_transitions(instance_id).await
        }
    }

    fn flaky_engine() -> WorkflowEngine<InMemoryCheckpointStore, FlakyProjection> {
        engine_with(
            InMemoryCheckpointStore::new(),
            FlakyProjection::default(),
            BoxRiskAssessor::new(RuleBasedRiskAssessor),
        )
    }

    #[tokio::test]
    async fn resume_completes_interrupted_sync_first() {
        let engine = flaky_engine();
        let id = InstanceId::new("crash");
        engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &vendor())
            .await
            .unwrap();
        let writes_before = engine.projections().inner.record_writes();

        engine.projections().failures.store(1, Ordering::SeqCst);
        let err = engine
            .resume(&id, &vendor_onboarding::central_decision_input(true, "alice", None))
            .await
            .unwrap_err();
        let EngineError::PartialWrite { sequence, .. } = err else {
            panic!("expected PartialWrite, got {err:?}");
        };
        assert_eq!(sequence, 3);
        assert_eq!(engine.get_state(&id).await.unwrap().sequence_number, 3);
        assert_eq!(engine.projections().inner.record_writes(), writes_before);

        // The next resume first syncs checkpoint 3, then keeps going.
        let state = engine.resume(&id, &json!({})).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::DeptReview);
        assert_eq!(state.sequence_number, 4);
        // one write for checkpoint 3, one for checkpoint 4
        assert_eq!(engine.projections().inner.record_writes(), writes_before + 2);

        let record = engine.business_record(&id).await.unwrap();
        assert_eq!(record.applied_sequence, 4);
    }

    #[tokio::test]
    async fn failed_transition_append_is_redriven_once() {
        let engine = flaky_engine();
        let id = InstanceId::new("audit-crash");
        engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &vendor())
            .await
            .unwrap();

        engine.projections().transition_failures.store(1, Ordering::SeqCst);
        let err = engine
            .resume(&id, &vendor_onboarding::central_decision_input(true, "alice", None))
            .await
            .unwrap_err();
        // checkpoint 4 moved the status to DEPT_REVIEW; its audit row failed
        let EngineError::PartialWrite { sequence, .. } = err else {
            panic!("expected PartialWrite, got {err:?}");
        };
        assert_eq!(sequence, 4);
        assert_eq!(engine.get_state(&id).await.unwrap().sequence_number, 4);
        assert_eq!(engine.projections().inner.transition_appends(), 1);
        let record = engine.business_record(&id).await.unwrap();
        assert_eq!(record.applied_sequence, 3);
        let writes_before = engine.projections().inner.record_writes();

        let state = engine.resume(&id, &json!({})).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::DeptReview);
        assert_eq!(state.sequence_number, 5);
        assert_eq!(engine.projections().inner.transition_appends(), 2);
        // one write for checkpoint 4, one for checkpoint 5
        assert_eq!(engine.projections().inner.record_writes(), writes_before + 2);

        engine.reconcile(&id).await.unwrap();
        assert_eq!(engine.projections().inner.transition_appends(), 2);
        assert_eq!(engine.projections().inner.record_writes(), writes_before + 2);

        let transitions = engine.transitions(&id).await.unwrap();
        assert_eq!(
            statuses(&transitions),
            vec![
                (WorkflowStatus::Draft, WorkflowStatus::CentralPending),
                (WorkflowStatus::CentralPending, WorkflowStatus::DeptReview),
            ]
        );
        assert_eq!(transitions[1].sequence_number, 4);
        assert_eq!(transitions[1].actor.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn reconcile_does_not_duplicate_transition() {
        let engine = flaky_engine();
        let id = InstanceId::new("po-crash");
        engine
            .start(
                WorkflowType::PurchaseOrder,
                Some(id.clone()),
                &json!({"poNumber": "PO-7", "vendorId": "v1", "amount": 10.0}),
            )
            .await
            .unwrap();

        engine.projections().failures.store(1, Ordering::SeqCst);
        let err = engine
            .resume(&id, &purchase_order::level_decision_input(true, "erin", None))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PartialWrite { .. }));
        // the transition row made it, the business record did not
        assert_eq!(engine.projections().inner.transition_appends(), 3);
        let writes_before = engine.projections().inner.record_writes();

        let state = engine.reconcile(&id).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Approved);
        assert_eq!(engine.projections().inner.transition_appends(), 3);
        assert_eq!(engine.projections().inner.record_writes(), writes_before + 1);

        engine.reconcile(&id).await.unwrap();
        assert_eq!(engine.projections().inner.record_writes(), writes_before + 1);

        // terminal: resume still re-drives (no-op now) and then refuses
        assert!(matches!(
            engine.resume(&id, &json!({})).await,
            Err(EngineError::InvalidState(_))
        ));
        assert_eq!(engine.transitions(&id).await.unwrap().len(), 3);
    }

    // -- guard rails -------------------------------------------------------

    struct FailingAssessor;

    impl RiskAssessor for FailingAssessor {
        async fn assess(&self, _: &VendorPayload) -> Result<RiskAssessment, AssessmentError> {
            Err(AssessmentError("scoring service unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn collaborator_failure_writes_no_checkpoint() {
        let engine = engine_with(
            InMemoryCheckpointStore::new(),
            InMemoryProjectionStore::new(),
            BoxRiskAssessor::new(FailingAssessor),
        );
        let id = InstanceId::new("v9");
        let err = engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &vendor())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NodeFailed { ref node, .. } if node == vendor_onboarding::ASSESS_RISK));

        // validate committed; assess_risk did not
        let state = engine.get_state(&id).await.unwrap();
        assert_eq!(state.sequence_number, 1);
        assert_eq!(state.current_node.as_str(), vendor_onboarding::ASSESS_RISK);
    }

    #[tokio::test]
    async fn runaway_loop_hits_step_limit() {
        let graph = GraphDefinition::builder(WorkflowType::VendorOnboarding)
            .start("spin")
            .node(
                "spin",
                FnNode(|_: &mut WorkflowInstance| -> Result<NodeOutcome, NodeError> {
                    Ok(NodeOutcome::Continue)
                }),
            )
            .edge("spin", Next::node("spin"))
            .compile()
            .unwrap();
        let settings = EngineSettings {
            max_steps_per_call: 5,
            node_timeout_secs: 30,
        };
        let engine = WorkflowEngine::new(
            InMemoryCheckpointStore::new(),
            InMemoryProjectionStore::new(),
            settings,
        )
        .with_graph(graph);

        let id = InstanceId::new("spin");
        let err = engine
            .start(WorkflowType::VendorOnboarding, Some(id.clone()), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StepLimitExceeded { limit: 5, .. }));
        assert_eq!(engine.history(&id).await.unwrap().len(), 6);
    }

    struct StuckNode;

    impl crate::graph::NodeHandler for StuckNode {
        fn run<'a>(&'a self, _: &'a mut WorkflowInstance) -> crate::graph::NodeFuture<'a> {
            Box::pin(std::future::pending::<Result<NodeOutcome, NodeError>>())
        }
    }

    #[tokio::test]
    async fn node_timeout_is_fatal() {
        let graph = GraphDefinition::builder(WorkflowType::PurchaseOrder)
            .start("stuck")
            .node("stuck", StuckNode)
            .edge("stuck", Next::End)
            .compile()
            .unwrap();
        let settings = EngineSettings {
            max_steps_per_call: 5,
            node_timeout_secs: 1,
        };
        let engine = WorkflowEngine::new(
            InMemoryCheckpointStore::new(),
            InMemoryProjectionStore::new(),
            settings,
        )
        .with_graph(graph);

        let id = InstanceId::new("stuck");
        let err = engine
            .start(WorkflowType::PurchaseOrder, Some(id.clone()), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NodeFailed { ref message, .. } if message.contains("timed out")));
        assert_eq!(engine.history(&id).await.unwrap().len(), 1);
        assert_eq!(
            engine.get_state(&id).await.unwrap().current_node,
            NodeId::new("stuck")
        );
    }

    #[tokio::test]
    async fn unregistered_workflow_type_is_invalid_state() {
        let engine = WorkflowEngine::new(
            InMemoryCheckpointStore::new(),
            InMemoryProjectionStore::new(),
            EngineSettings::default(),
        );
        assert!(engine.workflow_types().is_empty());
        let err = engine
            .start(WorkflowType::PurchaseOrder, None, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }
}
