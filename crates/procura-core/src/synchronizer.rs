//! State synchronizer: mirrors checkpoints into the business projection.
//!
//! For every committed checkpoint the synchronizer appends a transition
//! row (when the status changed) and then upserts the business record
//! tagged with the checkpoint's sequence number. The record write goes
//! last, so a record at sequence `k` implies the transition for `k` is
//! already stored. Both writes are idempotent, which makes re-driving a
//! partially applied step safe.

use chrono::Utc;
use serde_json::{Value, json};

use procura_types::approval::{
    ApprovalRow, BranchDecision, CENTRAL_APPROVAL_TYPE, PO_LEVEL_APPROVAL_TYPE,
};
use procura_types::error::RepositoryError;
use procura_types::payload::{ApprovalDecision, WorkflowPayload};
use procura_types::workflow::{
    BusinessRecord, InstanceId, NodeId, TransitionRecord, WorkflowInstance, WorkflowStatus,
};

use crate::repository::projection::ProjectionStore;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("projection store error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Whether a sync call changed the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied,
    AlreadyApplied,
}

/// Who caused a status change and why, as stored on the transition row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribution {
    pub actor: Option<String>,
    pub reason: Option<String>,
}

/// Reconciles checkpoints with the projection store.
pub struct StateSynchronizer<P: ProjectionStore> {
    store: P,
}

impl<P: ProjectionStore> StateSynchronizer<P> {
    pub fn new(store: P) -> Self {
        Self { store }
    }

    /// Access the underlying projection store.
    pub fn store(&self) -> &P {
        &self.store
    }

    /// Whether the projection already reflects `sequence` (or later).
    pub async fn is_applied(
        &self,
        instance_id: &InstanceId,
        sequence: u64,
    ) -> Result<bool, SyncError> {
        let record = self.store.get_record(instance_id).await?;
        Ok(record.is_some_and(|r| r.applied_sequence >= sequence))
    }

    /// Upsert the business record for `instance`. A no-op if its sequence
    /// is already applied.
    pub async fn sync(&self, instance: &WorkflowInstance) -> Result<SyncOutcome, SyncError> {
        if self
            .is_applied(&instance.instance_id, instance.sequence_number)
            .await?
        {
            return Ok(SyncOutcome::AlreadyApplied);
        }

        let record = project(instance);
        let written = self.store.upsert_record(&record).await?;

        tracing::debug!(
            instance_id = %instance.instance_id,
            sequence = instance.sequence_number,
            status = %instance.status,
            written,
            "synced business record"
        );

        Ok(if written {
            SyncOutcome::Applied
        } else {
            SyncOutcome::AlreadyApplied
        })
    }

    /// Append one transition row. Returns `false` if the row for
    /// `(instance_id, sequence)` already existed.
    pub async fn log_transition(
        &self,
        instance_id: &InstanceId,
        sequence: u64,
        from: WorkflowStatus,
        to: WorkflowStatus,
        node_id: &NodeId,
        attribution: Attribution,
    ) -> Result<bool, SyncError> {
        let transition = TransitionRecord {
            instance_id: instance_id.clone(),
            sequence_number: sequence,
            from_status: from,
            to_status: to,
            node_id: node_id.clone(),
            actor: attribution.actor,
            reason: attribution.reason,
            timestamp: Utc::now(),
        };
        let appended = self.store.append_transition(&transition).await?;

        tracing::info!(
            instance_id = %instance_id,
            sequence,
            from = %from,
            to = %to,
            node = %node_id,
            actor = transition.actor.as_deref().unwrap_or("-"),
            appended,
            "status transition"
        );

        Ok(appended)
    }

    /// Mirror one engine step: the transition (if the status changed from
    /// `previous_status`) followed by the business record.
    ///
    /// `node_id` is the node whose execution produced `instance`.
    pub async fn apply_step(
        &self,
        previous_status: Option<WorkflowStatus>,
        node_id: &NodeId,
        instance: &WorkflowInstance,
    ) -> Result<SyncOutcome, SyncError> {
        if self
            .is_applied(&instance.instance_id, instance.sequence_number)
            .await?
        {
            return Ok(SyncOutcome::AlreadyApplied);
        }

        if let Some(from) = previous_status.filter(|from| *from != instance.status) {
            self.log_transition(
                &instance.instance_id,
                instance.sequence_number,
                from,
                instance.status,
                node_id,
                attribution(instance),
            )
            .await?;
        }

        self.sync(instance).await
    }

    pub async fn record(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<BusinessRecord>, SyncError> {
        Ok(self.store.get_record(instance_id).await?)
    }

    pub async fn list_transitions(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<TransitionRecord>, SyncError> {
        Ok(self.store.list_transitions(instance_id).await?)
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Build the normalized business record for an instance.
pub fn project(instance: &WorkflowInstance) -> BusinessRecord {
    BusinessRecord {
        instance_id: instance.instance_id.clone(),
        workflow_type: instance.workflow_type(),
        current_node: instance.current_node.clone(),
        status: instance.status,
        payload: instance.payload.to_json(),
        derived: derived_fields(&instance.payload),
        approvals: approval_rows(&instance.payload),
        last_error: instance.last_error.clone(),
        applied_sequence: instance.sequence_number,
        created_at: instance.created_at,
        updated_at: instance.updated_at,
    }
}

/// Attribute the latest status change of `instance`.
///
/// A validation failure is its own reason. Otherwise the most recent
/// recorded decision supplies the actor and its comments the reason.
pub fn attribution(instance: &WorkflowInstance) -> Attribution {
    if let Some(reason) = &instance.last_error {
        return Attribution {
            actor: None,
            reason: Some(reason.clone()),
        };
    }

    let decision = match &instance.payload {
        WorkflowPayload::VendorOnboarding(vendor) => {
            let latest_branch = vendor.department_approvals.as_ref().and_then(|set| {
                set.iter()
                    .filter(|b| b.decision != BranchDecision::Pending)
                    .max_by_key(|b| b.decided_at)
            });
            if let Some(branch) = latest_branch {
                return Attribution {
                    actor: branch.decided_by.clone(),
                    reason: branch.comments.clone(),
                };
            }
            vendor.central_approval.as_ref()
        }
        WorkflowPayload::PurchaseOrder(po) => po.level_approval.as_ref(),
    };

    decision
        .map(|d| Attribution {
            actor: d.decided_by.clone(),
            reason: d.comments.clone(),
        })
        .unwrap_or_default()
}

fn derived_fields(payload: &WorkflowPayload) -> Value {
    match payload {
        WorkflowPayload::VendorOnboarding(vendor) => json!({
            "name": vendor.name,
            "taxId": vendor.tax_id,
            "category": vendor.category,
            "contactEmail": vendor.contact_email,
            "riskScore": vendor.risk_assessment.as_ref().map(|r| r.score),
        }),
        WorkflowPayload::PurchaseOrder(po) => json!({
            "poNumber": po.po_number,
            "vendorId": po.vendor_id,
            "amount": po.amount,
            "quantity": po.quantity,
            "currency": po.currency,
            "approvalLevel": po.approval_level,
        }),
    }
}

fn approval_rows(payload: &WorkflowPayload) -> Vec<ApprovalRow> {
    let mut rows = Vec::new();
    match payload {
        WorkflowPayload::VendorOnboarding(vendor) => {
            if let Some(central) = &vendor.central_approval {
                rows.push(decision_row(CENTRAL_APPROVAL_TYPE, central));
            }
            if let Some(set) = &vendor.department_approvals {
                rows.extend(
                    set.iter()
                        .filter(|b| b.decision != BranchDecision::Pending)
                        .map(|b| ApprovalRow {
                            approval_type: b.branch_key.clone(),
                            decision: b.decision,
                            decided_by: b.decided_by.clone(),
                            comments: b.comments.clone(),
                            decided_at: b.decided_at,
                        }),
                );
            }
        }
        WorkflowPayload::PurchaseOrder(po) => {
            if let Some(level) = &po.level_approval {
                rows.push(decision_row(PO_LEVEL_APPROVAL_TYPE, level));
            }
        }
    }
    rows
}

fn decision_row(approval_type: &str, decision: &ApprovalDecision) -> ApprovalRow {
    ApprovalRow {
        approval_type: approval_type.to_string(),
        decision: BranchDecision::from_approved(decision.approved),
        decided_by: decision.decided_by.clone(),
        comments: decision.comments.clone(),
        decided_at: None,
    }
}
