//! Purchase order approval workflow.
//!
//! ```text
//! submit -> compliance_check --L1--> [l1_review] -> end
//!                            --L2--> [l2_review] -> end
//!                            --L3--> [l3_review] -> end
//! ```
//!
//! The approval tier is derived from the order amount against the
//! configured limits. Each review node waits for a `levelApproval`.

use serde_json::{Value, json};

use procura_types::config::PurchaseOrderConfig;
use procura_types::payload::{ApprovalLevel, PurchaseOrderPayload};
use procura_types::workflow::{WorkflowInstance, WorkflowStatus, WorkflowType};

use super::wrong_payload;
use crate::collaborator::{RequiredFieldsValidator, SubmissionValidator};
use crate::graph::{FnNode, GraphDefinition, GraphError, Next, NodeError, NodeOutcome};

pub const SUBMIT: &str = "submit";
pub const COMPLIANCE_CHECK: &str = "compliance_check";
pub const L1_REVIEW: &str = "l1_review";
pub const L2_REVIEW: &str = "l2_review";
pub const L3_REVIEW: &str = "l3_review";

const REQUIRED_FIELDS: [&str; 3] = ["poNumber", "vendorId", "amount"];

pub fn graph(config: &PurchaseOrderConfig) -> Result<GraphDefinition, GraphError> {
    let validator = RequiredFieldsValidator::new(REQUIRED_FIELDS);
    let limits = config.clone();

    let mut builder = GraphDefinition::builder(WorkflowType::PurchaseOrder)
        .initial_status(WorkflowStatus::Draft)
        .rejection_status(WorkflowStatus::Rejected)
        .start(SUBMIT)
        .node(SUBMIT, FnNode(submit))
        .edge(SUBMIT, Next::node(COMPLIANCE_CHECK))
        .node(
            COMPLIANCE_CHECK,
            FnNode(move |instance: &mut WorkflowInstance| {
                compliance_check(&validator, &limits, instance)
            }),
        )
        .route(
            COMPLIANCE_CHECK,
            route_by_level,
            vec![
                Next::node(L1_REVIEW),
                Next::node(L2_REVIEW),
                Next::node(L3_REVIEW),
            ],
        );

    for review in [L1_REVIEW, L2_REVIEW, L3_REVIEW] {
        builder = builder
            .node(review, FnNode(level_review))
            .edge(review, Next::End)
            .interrupt(review);
    }

    builder.compile()
}

/// Resume input carrying the approver's decision at the routed level.
pub fn level_decision_input(approved: bool, decided_by: &str, comments: Option<&str>) -> Value {
    json!({
        "levelApproval": {
            "approved": approved,
            "decidedBy": decided_by,
            "comments": comments,
        }
    })
}

/// Approval tier for `amount` under `limits`.
pub fn approval_level(amount: f64, limits: &PurchaseOrderConfig) -> ApprovalLevel {
    if amount < limits.l1_limit {
        ApprovalLevel::L1
    } else if amount < limits.l2_limit {
        ApprovalLevel::L2
    } else {
        ApprovalLevel::L3
    }
}

fn po_mut(instance: &mut WorkflowInstance) -> Result<&mut PurchaseOrderPayload, NodeError> {
    let err = wrong_payload(instance);
    instance.payload.as_purchase_order_mut().ok_or(err)
}

fn submit(instance: &mut WorkflowInstance) -> Result<NodeOutcome, NodeError> {
    po_mut(instance)?;
    instance.status = WorkflowStatus::ComplianceCheck;
    Ok(NodeOutcome::Continue)
}

fn compliance_check(
    validator: &RequiredFieldsValidator,
    limits: &PurchaseOrderConfig,
    instance: &mut WorkflowInstance,
) -> Result<NodeOutcome, NodeError> {
    let result = validator.validate(&instance.payload);
    if !result.valid {
        return Err(NodeError::Validation(
            result
                .error_message
                .unwrap_or_else(|| "purchase order is invalid".to_string()),
        ));
    }

    let po = po_mut(instance)?;
    let amount = po.amount.unwrap_or_default();
    if !amount.is_finite() || amount <= 0.0 {
        return Err(NodeError::Validation(format!(
            "amount must be positive, got {amount}"
        )));
    }
    if po.quantity == Some(0) {
        return Err(NodeError::Validation(
            "quantity must be at least 1".to_string(),
        ));
    }

    let level = approval_level(amount, limits);
    po.approval_level = Some(level);
    instance.status = match level {
        ApprovalLevel::L1 => WorkflowStatus::PoL1,
        ApprovalLevel::L2 => WorkflowStatus::PoL2,
        ApprovalLevel::L3 => WorkflowStatus::PoL3,
    };
    Ok(NodeOutcome::Continue)
}

fn route_by_level(instance: &WorkflowInstance) -> Next {
    match instance
        .payload
        .as_purchase_order()
        .and_then(|po| po.approval_level)
    {
        Some(ApprovalLevel::L1) => Next::node(L1_REVIEW),
        Some(ApprovalLevel::L2) => Next::node(L2_REVIEW),
        Some(ApprovalLevel::L3) => Next::node(L3_REVIEW),
        None => Next::End,
    }
}

fn level_review(instance: &mut WorkflowInstance) -> Result<NodeOutcome, NodeError> {
    let decision = po_mut(instance)?.level_approval.as_ref().map(|d| d.approved);
    match decision {
        None => Ok(NodeOutcome::Wait),
        Some(approved) => {
            instance.status = if approved {
                WorkflowStatus::Approved
            } else {
                WorkflowStatus::Rejected
            };
            Ok(NodeOutcome::Continue)
        }
    }
}
