//! Fan-out/fan-in primitive for parallel approval branches.
//!
//! Branches are created all pending, decided one at a time, and joined with
//! a veto predicate: any rejection rejects the whole set, and the set is
//! approved only once every branch approved.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use procura_types::approval::{
    ApprovalBranch, BranchDecision, BranchSet, RESERVED_APPROVAL_TYPES,
};
use procura_types::error::BranchError;

/// Result of evaluating the join predicate over a branch set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinOutcome {
    Waiting,
    Approved,
    Rejected,
}

/// Create a branch set with every key pending.
///
/// Empty, blank, duplicate, or reserved keys are rejected.
pub fn init_branches<I, S>(keys: I) -> Result<BranchSet, BranchError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut branches = BTreeMap::new();
    for key in keys {
        let key = key.as_ref().trim();
        if key.is_empty() {
            return Err(BranchError::InvalidBranchSet(
                "branch keys must not be blank".to_string(),
            ));
        }
        if RESERVED_APPROVAL_TYPES.contains(&key) {
            return Err(BranchError::InvalidBranchSet(format!(
                "branch key '{key}' is a reserved approval type"
            )));
        }
        if branches
            .insert(key.to_string(), ApprovalBranch::pending(key))
            .is_some()
        {
            return Err(BranchError::InvalidBranchSet(format!(
                "duplicate branch key '{key}'"
            )));
        }
    }
    if branches.is_empty() {
        return Err(BranchError::InvalidBranchSet(
            "at least one branch is required".to_string(),
        ));
    }
    Ok(BranchSet { branches })
}

/// Record a decision on one pending branch and return the updated set.
///
/// The input set is left untouched, so a failed call never leaves a
/// half-applied decision behind.
pub fn record_decision(
    set: &BranchSet,
    branch_key: &str,
    decision: BranchDecision,
    actor: &str,
    comments: Option<&str>,
) -> Result<BranchSet, BranchError> {
    if decision == BranchDecision::Pending {
        return Err(BranchError::PendingDecision);
    }
    let current = set
        .get(branch_key)
        .ok_or_else(|| BranchError::UnknownBranch(branch_key.to_string()))?;
    if current.decision != BranchDecision::Pending {
        return Err(BranchError::AlreadyDecided {
            branch: branch_key.to_string(),
            decision: current.decision,
        });
    }

    let mut updated = set.clone();
    updated.branches.insert(
        branch_key.to_string(),
        ApprovalBranch {
            branch_key: branch_key.to_string(),
            decision,
            decided_by: Some(actor.to_string()),
            decided_at: Some(Utc::now()),
            comments: comments.map(str::to_string),
        },
    );
    Ok(updated)
}

/// Apply the join predicate.
///
/// A rejection anywhere short-circuits to `Rejected`. An empty set never
/// counts as approved.
pub fn evaluate(set: &BranchSet) -> JoinOutcome {
    if set.iter().any(|b| b.decision == BranchDecision::Rejected) {
        return JoinOutcome::Rejected;
    }
    if !set.is_empty() && set.iter().all(|b| b.decision == BranchDecision::Approved) {
        return JoinOutcome::Approved;
    }
    JoinOutcome::Waiting
}
