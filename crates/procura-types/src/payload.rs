//! Typed business payloads, one variant per workflow type.
//!
//! Payloads carry only routing-relevant data. Callers speak JSON (start
//! payloads, resume input); the engine converts that JSON into the typed
//! variant and shallow-merges resume input onto the existing payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::approval::BranchSet;
use crate::error::PayloadError;
use crate::workflow::WorkflowType;

/// JSON key carrying the variant tag. Resume input cannot override it.
pub const PAYLOAD_TAG: &str = "workflow_type";

/// Vendor keys written only by workflow nodes.
pub const VENDOR_ENGINE_KEYS: [&str; 2] = ["riskAssessment", "departmentApprovals"];

/// Purchase order keys written only by workflow nodes.
pub const PURCHASE_ORDER_ENGINE_KEYS: [&str; 1] = ["approvalLevel"];

/// Decision keys a caller may set once; a recorded decision is never replaced.
const VENDOR_DECISION_KEYS: [&str; 1] = ["centralApproval"];
const PURCHASE_ORDER_DECISION_KEYS: [&str; 1] = ["levelApproval"];

/// Business payload, internally tagged by workflow type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "workflow_type", rename_all = "snake_case")]
pub enum WorkflowPayload {
    VendorOnboarding(VendorPayload),
    PurchaseOrder(PurchaseOrderPayload),
}

impl WorkflowPayload {
    pub fn workflow_type(&self) -> WorkflowType {
        match self {
            WorkflowPayload::VendorOnboarding(_) => WorkflowType::VendorOnboarding,
            WorkflowPayload::PurchaseOrder(_) => WorkflowType::PurchaseOrder,
        }
    }

    /// Build the payload for a new instance from caller-supplied JSON.
    ///
    /// A `workflow_type` key in `input` is ignored in favour of `workflow_type`.
    /// Engine-owned keys are rejected.
    pub fn from_json(workflow_type: WorkflowType, input: &Value) -> Result<Self, PayloadError> {
        let Value::Object(fields) = input else {
            return Err(PayloadError::NotAnObject);
        };
        reject_engine_keys(workflow_type, fields)?;
        let mut object = Map::new();
        merge_fields(&mut object, fields);
        object.insert(
            PAYLOAD_TAG.to_string(),
            Value::String(workflow_type.as_str().to_string()),
        );
        parse_variant(workflow_type, object)
    }

    /// Shallow-merge `input` onto this payload and re-parse the same variant.
    ///
    /// Top-level keys in `input` replace existing keys; all other keys are
    /// retained. A `null` clears an optional field. Engine-owned keys are
    /// rejected, as is a decision key that already holds a decision.
    pub fn merged(&self, input: &Value) -> Result<Self, PayloadError> {
        let Value::Object(fields) = input else {
            return Err(PayloadError::NotAnObject);
        };
        let workflow_type = self.workflow_type();
        reject_engine_keys(workflow_type, fields)?;
        let mut object = match self.to_json() {
            Value::Object(object) => object,
            _ => return Err(PayloadError::NotAnObject),
        };
        let decision_keys: &[&str] = match workflow_type {
            WorkflowType::VendorOnboarding => &VENDOR_DECISION_KEYS,
            WorkflowType::PurchaseOrder => &PURCHASE_ORDER_DECISION_KEYS,
        };
        if let Some(key) = decision_keys
            .iter()
            .find(|key| fields.contains_key(**key) && object.contains_key(**key))
        {
            return Err(PayloadError::DecisionRecorded((*key).to_string()));
        }
        merge_fields(&mut object, fields);
        parse_variant(workflow_type, object)
    }

    /// JSON form including the `workflow_type` tag.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn as_vendor(&self) -> Option<&VendorPayload> {
        match self {
            WorkflowPayload::VendorOnboarding(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_vendor_mut(&mut self) -> Option<&mut VendorPayload> {
        match self {
            WorkflowPayload::VendorOnboarding(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_purchase_order(&self) -> Option<&PurchaseOrderPayload> {
        match self {
            WorkflowPayload::PurchaseOrder(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_purchase_order_mut(&mut self) -> Option<&mut PurchaseOrderPayload> {
        match self {
            WorkflowPayload::PurchaseOrder(p) => Some(p),
            _ => None,
        }
    }
}

/// Keys of `workflow_type` that only workflow nodes may write.
pub fn engine_owned_keys(workflow_type: WorkflowType) -> &'static [&'static str] {
    match workflow_type {
        WorkflowType::VendorOnboarding => &VENDOR_ENGINE_KEYS,
        WorkflowType::PurchaseOrder => &PURCHASE_ORDER_ENGINE_KEYS,
    }
}

fn reject_engine_keys(
    workflow_type: WorkflowType,
    fields: &Map<String, Value>,
) -> Result<(), PayloadError> {
    match engine_owned_keys(workflow_type)
        .iter()
        .find(|key| fields.contains_key(**key))
    {
        Some(key) => Err(PayloadError::EngineOwned {
            workflow_type,
            field: (*key).to_string(),
        }),
        None => Ok(()),
    }
}

fn merge_fields(object: &mut Map<String, Value>, fields: &Map<String, Value>) {
    for (key, value) in fields {
        if key == PAYLOAD_TAG {
            continue;
        }
        object.insert(key.clone(), value.clone());
    }
}

fn parse_variant(
    workflow_type: WorkflowType,
    object: Map<String, Value>,
) -> Result<WorkflowPayload, PayloadError> {
    serde_json::from_value(Value::Object(object)).map_err(|e| PayloadError::Schema {
        workflow_type,
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Vendor onboarding
// ---------------------------------------------------------------------------

/// Vendor onboarding request data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    /// Free-form financial details supplied with the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financials: Option<Value>,
    /// Result of the risk assessment collaborator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<RiskAssessment>,
    /// Central procurement decision, supplied as resume input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub central_approval: Option<ApprovalDecision>,
    /// Department fan-out, created when department review opens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_approvals: Option<BranchSet>,
    /// A single department's decision awaiting aggregation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_decision: Option<DepartmentDecision>,
}

/// Structured risk result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    /// 0 (no risk) to 100 (maximum risk).
    pub score: u32,
    #[serde(default)]
    pub factors: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// A single approve/reject decision by a human reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecision {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// One department's decision on its approval branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentDecision {
    pub branch: String,
    pub approved: bool,
    pub decided_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

// ---------------------------------------------------------------------------
// Purchase order
// ---------------------------------------------------------------------------

/// Approval tier a purchase order is routed to, derived from its amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalLevel {
    L1,
    L2,
    L3,
}

/// Purchase order request data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub po_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_level: Option<ApprovalLevel>,
    /// Decision of the approver at `approval_level`, supplied as resume input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_approval: Option<ApprovalDecision>,
}

fn default_currency() -> String {
    "INR".to_string()
}
