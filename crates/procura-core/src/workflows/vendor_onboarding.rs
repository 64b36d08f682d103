//! Vendor onboarding workflow.
//!
//! ```text
//! validate -> assess_risk -> [central_review] --approved--> open_department_review -> [aggregate] -> end
//!                                   \--rejected--> end
//! ```
//!
//! Bracketed nodes are interrupts. `central_review` waits for a
//! `centralApproval` decision; `aggregate` applies one `departmentDecision`
//! per resume and waits until the department branches resolve.

use std::sync::Arc;

use serde_json::{Value, json};

use procura_types::approval::{BranchDecision, RESERVED_APPROVAL_TYPES};
use procura_types::config::VendorOnboardingConfig;
use procura_types::error::BranchError;
use procura_types::payload::VendorPayload;
use procura_types::workflow::{WorkflowInstance, WorkflowStatus, WorkflowType};

use super::wrong_payload;
use crate::aggregator::{self, JoinOutcome};
use crate::collaborator::{
    BoxRiskAssessor, RequiredFieldsValidator, RiskAssessor, SubmissionValidator,
};
use crate::graph::{
    FnNode, GraphDefinition, GraphError, Next, NodeError, NodeFuture, NodeHandler, NodeOutcome,
};

pub const VALIDATE: &str = "validate";
pub const ASSESS_RISK: &str = "assess_risk";
pub const CENTRAL_REVIEW: &str = "central_review";
pub const OPEN_DEPARTMENT_REVIEW: &str = "open_department_review";
pub const AGGREGATE: &str = "aggregate";

pub fn graph(
    config: &VendorOnboardingConfig,
    assessor: Arc<BoxRiskAssessor>,
) -> Result<GraphDefinition, GraphError> {
    let validator = RequiredFieldsValidator::new(config.required_fields.clone());
    let departments = config.departments.clone();
    if let Some(reserved) = departments
        .iter()
        .find(|key| RESERVED_APPROVAL_TYPES.contains(&key.trim()))
    {
        return Err(GraphError::ReservedBranchKey(reserved.clone()));
    }

    GraphDefinition::builder(WorkflowType::VendorOnboarding)
        .initial_status(WorkflowStatus::Draft)
        .rejection_status(WorkflowStatus::Rejected)
        .start(VALIDATE)
        .node(
            VALIDATE,
            FnNode(move |instance: &mut WorkflowInstance| validate(&validator, instance)),
        )
        .edge(VALIDATE, Next::node(ASSESS_RISK))
        .node(ASSESS_RISK, AssessRisk { assessor })
        .edge(ASSESS_RISK, Next::node(CENTRAL_REVIEW))
        .node(CENTRAL_REVIEW, FnNode(central_review))
        .route(
            CENTRAL_REVIEW,
            after_central_review,
            vec![Next::node(OPEN_DEPARTMENT_REVIEW), Next::End],
        )
        .interrupt(CENTRAL_REVIEW)
        .node(
            OPEN_DEPARTMENT_REVIEW,
            FnNode(move |instance: &mut WorkflowInstance| {
                open_department_review(&departments, instance)
            }),
        )
        .edge(OPEN_DEPARTMENT_REVIEW, Next::node(AGGREGATE))
        .node(AGGREGATE, FnNode(aggregate))
        .edge(AGGREGATE, Next::End)
        .interrupt(AGGREGATE)
        .compile()
}

// ---------------------------------------------------------------------------
// Resume input helpers
// ---------------------------------------------------------------------------

/// Resume input carrying the central procurement decision.
pub fn central_decision_input(approved: bool, decided_by: &str, comments: Option<&str>) -> Value {
    json!({
        "centralApproval": {
            "approved": approved,
            "decidedBy": decided_by,
            "comments": comments,
        }
    })
}

/// Resume input carrying one department's decision.
pub fn department_decision_input(
    branch: &str,
    approved: bool,
    decided_by: &str,
    comments: Option<&str>,
) -> Value {
    json!({
        "departmentDecision": {
            "branch": branch,
            "approved": approved,
            "decidedBy": decided_by,
            "comments": comments,
        }
    })
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

fn vendor_mut(instance: &mut WorkflowInstance) -> Result<&mut VendorPayload, NodeError> {
    let err = wrong_payload(instance);
    instance.payload.as_vendor_mut().ok_or(err)
}

fn validate(
    validator: &RequiredFieldsValidator,
    instance: &mut WorkflowInstance,
) -> Result<NodeOutcome, NodeError> {
    let result = validator.validate(&instance.payload);
    if !result.valid {
        return Err(NodeError::Validation(
            result
                .error_message
                .unwrap_or_else(|| "submission is invalid".to_string()),
        ));
    }
    instance.status = WorkflowStatus::CentralPending;
    Ok(NodeOutcome::Continue)
}

struct AssessRisk {
    assessor: Arc<BoxRiskAssessor>,
}

impl NodeHandler for AssessRisk {
    fn run<'a>(&'a self, instance: &'a mut WorkflowInstance) -> NodeFuture<'a> {
        Box::pin(async move {
            let vendor = vendor_mut(instance)?;
            let assessment = self
                .assessor
                .assess(vendor)
                .await
                .map_err(|e| NodeError::Collaborator(e.to_string()))?;
            tracing::debug!(score = assessment.score, "vendor risk assessed");
            vendor.risk_assessment = Some(assessment);
            Ok(NodeOutcome::Continue)
        })
    }
}

fn central_review(instance: &mut WorkflowInstance) -> Result<NodeOutcome, NodeError> {
    let decision = vendor_mut(instance)?
        .central_approval
        .as_ref()
        .map(|d| d.approved);
    match decision {
        None => Ok(NodeOutcome::Wait),
        Some(true) => Ok(NodeOutcome::Continue),
        Some(false) => {
            instance.status = WorkflowStatus::Rejected;
            Ok(NodeOutcome::Continue)
        }
    }
}

fn after_central_review(instance: &WorkflowInstance) -> Next {
    let approved = instance
        .payload
        .as_vendor()
        .and_then(|v| v.central_approval.as_ref())
        .is_some_and(|d| d.approved);
    if approved {
        Next::node(OPEN_DEPARTMENT_REVIEW)
    } else {
        Next::End
    }
}

fn open_department_review(
    departments: &[String],
    instance: &mut WorkflowInstance,
) -> Result<NodeOutcome, NodeError> {
    let branches = aggregator::init_branches(departments)?;
    let vendor = vendor_mut(instance)?;
    vendor.department_approvals = Some(branches);
    vendor.department_decision = None;
    instance.status = WorkflowStatus::DeptReview;
    Ok(NodeOutcome::Continue)
}

fn aggregate(instance: &mut WorkflowInstance) -> Result<NodeOutcome, NodeError> {
    let vendor = vendor_mut(instance)?;
    let mut branches = vendor.department_approvals.take().ok_or_else(|| {
        BranchError::InvalidBranchSet("department review has not been opened".to_string())
    })?;

    if let Some(decision) = vendor.department_decision.take() {
        branches = aggregator::record_decision(
            &branches,
            &decision.branch,
            BranchDecision::from_approved(decision.approved),
            &decision.decided_by,
            decision.comments.as_deref(),
        )?;
    }

    let outcome = aggregator::evaluate(&branches);
    tracing::debug!(
        ?outcome,
        pending = branches.pending_count(),
        "evaluated department approvals"
    );
    vendor.department_approvals = Some(branches);

    match outcome {
        JoinOutcome::Waiting => Ok(NodeOutcome::Wait),
        JoinOutcome::Approved => {
            instance.status = WorkflowStatus::Approved;
            Ok(NodeOutcome::Continue)
        }
        JoinOutcome::Rejected => {
            instance.status = WorkflowStatus::Rejected;
            Ok(NodeOutcome::Continue)
        }
    }
}
