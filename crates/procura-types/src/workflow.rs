//! Workflow instance domain types for Procura.
//!
//! A `WorkflowInstance` is the fixed-schema execution state the engine
//! advances node by node. Every step produces an immutable `Checkpoint`
//! holding a full copy of the instance, and every observed status change
//! produces one append-only `TransitionRecord`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approval::ApprovalRow;
use crate::payload::WorkflowPayload;

/// Node id used as the end marker. Instances positioned here are terminal.
pub const END_NODE: &str = "__end__";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque workflow instance identifier.
///
/// Callers may supply their own id (e.g. a vendor request number); otherwise
/// a time-sortable UUIDv7 string is generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new UUIDv7-based id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Name of a node inside a graph definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The end marker node.
    pub fn end() -> Self {
        Self(END_NODE.to_string())
    }

    pub fn is_end(&self) -> bool {
        self.0 == END_NODE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Workflow type & status
// ---------------------------------------------------------------------------

/// Selects the compiled graph definition an instance runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    VendorOnboarding,
    PurchaseOrder,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 2] = [WorkflowType::VendorOnboarding, WorkflowType::PurchaseOrder];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::VendorOnboarding => "vendor_onboarding",
            WorkflowType::PurchaseOrder => "purchase_order",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "vendor_onboarding" | "vendor" => Ok(WorkflowType::VendorOnboarding),
            "purchase_order" | "po" => Ok(WorkflowType::PurchaseOrder),
            other => Err(format!("invalid workflow type: '{other}'")),
        }
    }
}

/// Status of a workflow instance.
///
/// One closed enumeration shared by every workflow type; each graph
/// declares which of these it uses as its initial and rejection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Draft,
    CentralPending,
    DeptReview,
    ComplianceCheck,
    #[serde(rename = "PO_L1")]
    PoL1,
    #[serde(rename = "PO_L2")]
    PoL2,
    #[serde(rename = "PO_L3")]
    PoL3,
    Approved,
    Rejected,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "DRAFT",
            WorkflowStatus::CentralPending => "CENTRAL_PENDING",
            WorkflowStatus::DeptReview => "DEPT_REVIEW",
            WorkflowStatus::ComplianceCheck => "COMPLIANCE_CHECK",
            WorkflowStatus::PoL1 => "PO_L1",
            WorkflowStatus::PoL2 => "PO_L2",
            WorkflowStatus::PoL3 => "PO_L3",
            WorkflowStatus::Approved => "APPROVED",
            WorkflowStatus::Rejected => "REJECTED",
        }
    }

    /// Whether this status only ever appears on terminal instances.
    pub fn is_final(&self) -> bool {
        matches!(self, WorkflowStatus::Approved | WorkflowStatus::Rejected)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DRAFT" => Ok(WorkflowStatus::Draft),
            "CENTRAL_PENDING" => Ok(WorkflowStatus::CentralPending),
            "DEPT_REVIEW" => Ok(WorkflowStatus::DeptReview),
            "COMPLIANCE_CHECK" => Ok(WorkflowStatus::ComplianceCheck),
            "PO_L1" => Ok(WorkflowStatus::PoL1),
            "PO_L2" => Ok(WorkflowStatus::PoL2),
            "PO_L3" => Ok(WorkflowStatus::PoL3),
            "APPROVED" => Ok(WorkflowStatus::Approved),
            "REJECTED" => Ok(WorkflowStatus::Rejected),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Instance, checkpoint, transition
// ---------------------------------------------------------------------------

/// The execution state of one workflow instance.
///
/// `status` never diverges from the latest persisted checkpoint: the engine
/// only mutates a working copy and commits it through the checkpoint store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub instance_id: InstanceId,
    /// Node the instance continues from on the next run (or the end marker).
    pub current_node: NodeId,
    pub status: WorkflowStatus,
    /// Routing-relevant business data, tagged by workflow type.
    pub payload: WorkflowPayload,
    /// Sequence number of the checkpoint this snapshot belongs to.
    pub sequence_number: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Reason for the last validation failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl WorkflowInstance {
    pub fn workflow_type(&self) -> WorkflowType {
        self.payload.workflow_type()
    }

    /// Terminal once positioned at the end marker.
    pub fn is_terminal(&self) -> bool {
        self.current_node.is_end()
    }
}

/// An immutable snapshot of an instance at one sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub instance_id: InstanceId,
    pub sequence_number: u64,
    /// The sequence this checkpoint was saved against (None for sequence 0).
    pub parent_sequence_number: Option<u64>,
    pub snapshot: WorkflowInstance,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit entry for one observed status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub instance_id: InstanceId,
    pub sequence_number: u64,
    pub from_status: WorkflowStatus,
    pub to_status: WorkflowStatus,
    /// Node that produced the status change.
    pub node_id: NodeId,
    /// Reviewer whose decision caused the change, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Validation failure message or reviewer comments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Normalized, query-friendly projection of an instance.
///
/// Written by the state synchronizer; `applied_sequence` is the checkpoint
/// sequence the record reflects and doubles as the idempotency marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRecord {
    pub instance_id: InstanceId,
    pub workflow_type: WorkflowType,
    pub current_node: NodeId,
    pub status: WorkflowStatus,
    pub payload: serde_json::Value,
    /// Per-type fields lifted out of the payload (vendor name, PO amount, ...).
    pub derived: serde_json::Value,
    #[serde(default)]
    pub approvals: Vec<ApprovalRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub applied_sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_generate_is_unique() {
        let a = InstanceId::generate();
        let b = InstanceId::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_node_id_end_marker() {
        assert!(NodeId::end().is_end());
        assert!(!NodeId::new("validate").is_end());
        assert_eq!(NodeId::end().to_string(), END_NODE);
    }

    #[test]
    fn test_workflow_status_serde_and_display() {
        for status in [
            WorkflowStatus::Draft,
            WorkflowStatus::CentralPending,
            WorkflowStatus::DeptReview,
            WorkflowStatus::ComplianceCheck,
            WorkflowStatus::PoL1,
            WorkflowStatus::PoL2,
            WorkflowStatus::PoL3,
            WorkflowStatus::Approved,
            WorkflowStatus::Rejected,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.to_string().parse::<WorkflowStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn test_workflow_type_parse() {
        assert_eq!(
            "vendor-onboarding".parse::<WorkflowType>().unwrap(),
            WorkflowType::VendorOnboarding
        );
        assert_eq!("po".parse::<WorkflowType>().unwrap(), WorkflowType::PurchaseOrder);
        assert!("invoice".parse::<WorkflowType>().is_err());
        assert_eq!(
            serde_json::to_string(&WorkflowType::PurchaseOrder).unwrap(),
            "\"purchase_order\""
        );
    }

    #[test]
    fn test_final_statuses() {
        assert!(WorkflowStatus::Approved.is_final());
        assert!(WorkflowStatus::Rejected.is_final());
        assert!(!WorkflowStatus::DeptReview.is_final());
    }
}
