//! Approval branch types.
//!
//! Parallel approvals (finance, legal, business, ...) are tracked as a
//! `BranchSet`: one `ApprovalBranch` per branch key, created all pending
//! and decided one branch at a time.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Approval type of the central procurement decision row.
pub const CENTRAL_APPROVAL_TYPE: &str = "central";

/// Approval type of the purchase order level decision row.
pub const PO_LEVEL_APPROVAL_TYPE: &str = "po_level";

/// Approval types that share the projection's approval table with branch
/// keys. A branch may not use one of them as its key.
pub const RESERVED_APPROVAL_TYPES: [&str; 2] = [CENTRAL_APPROVAL_TYPE, PO_LEVEL_APPROVAL_TYPE];

/// Decision state of a single approval branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchDecision {
    Pending,
    Approved,
    Rejected,
}

impl BranchDecision {
    pub fn from_approved(approved: bool) -> Self {
        if approved {
            BranchDecision::Approved
        } else {
            BranchDecision::Rejected
        }
    }
}

impl fmt::Display for BranchDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchDecision::Pending => write!(f, "pending"),
            BranchDecision::Approved => write!(f, "approved"),
            BranchDecision::Rejected => write!(f, "rejected"),
        }
    }
}

impl FromStr for BranchDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(BranchDecision::Pending),
            "approved" => Ok(BranchDecision::Approved),
            "rejected" => Ok(BranchDecision::Rejected),
            other => Err(format!("invalid branch decision: '{other}'")),
        }
    }
}

/// One parallel approval path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalBranch {
    pub branch_key: String,
    pub decision: BranchDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

impl ApprovalBranch {
    pub fn pending(branch_key: impl Into<String>) -> Self {
        Self {
            branch_key: branch_key.into(),
            decision: BranchDecision::Pending,
            decided_by: None,
            decided_at: None,
            comments: None,
        }
    }
}

/// All branches of one fan-out, keyed by branch key.
///
/// Ordered map so serialization and evaluation order are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchSet {
    pub branches: BTreeMap<String, ApprovalBranch>,
}

impl BranchSet {
    pub fn get(&self, key: &str) -> Option<&ApprovalBranch> {
        self.branches.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ApprovalBranch> {
        self.branches.values()
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Number of branches still awaiting a decision.
    pub fn pending_count(&self) -> usize {
        self.iter()
            .filter(|b| b.decision == BranchDecision::Pending)
            .count()
    }
}

/// Normalized approval row written to the projection store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRow {
    /// `central`, `po_level`, or a department branch key.
    pub approval_type: String,
    pub decision: BranchDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}
