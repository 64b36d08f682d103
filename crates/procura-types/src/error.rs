use thiserror::Error;

use crate::approval::BranchDecision;
use crate::workflow::{InstanceId, WorkflowType};

/// Errors from projection repository operations (used by trait definitions in procura-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors raised by checkpoint store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The compare-and-set on the latest sequence number failed.
    #[error(
        "concurrent modification of instance '{instance_id}': expected latest {expected:?}, found {actual:?}"
    )]
    ConcurrentModification {
        instance_id: InstanceId,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// No checkpoint exists for the instance (or at the requested sequence).
    #[error("checkpoint not found for instance '{instance_id}'{}", sequence.map(|s| format!(" at sequence {s}")).unwrap_or_default())]
    NotFound {
        instance_id: InstanceId,
        sequence: Option<u64>,
    },

    /// The backing store could not be reached or the write failed.
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),

    /// A stored snapshot could not be decoded.
    #[error("corrupt checkpoint data: {0}")]
    Corrupt(String),
}

/// Errors from the fan-out branch aggregator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BranchError {
    #[error("unknown approval branch '{0}'")]
    UnknownBranch(String),

    #[error("approval branch '{branch}' was already decided ({decision})")]
    AlreadyDecided {
        branch: String,
        decision: BranchDecision,
    },

    #[error("a branch decision must be approved or rejected, not pending")]
    PendingDecision,

    #[error("invalid branch set: {0}")]
    InvalidBranchSet(String),
}

/// Errors converting caller-supplied JSON into a typed payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("payload does not match the {workflow_type} schema: {message}")]
    Schema {
        workflow_type: WorkflowType,
        message: String,
    },

    #[error("field '{field}' of {workflow_type} is written by the workflow, not the caller")]
    EngineOwned {
        workflow_type: WorkflowType,
        field: String,
    },

    #[error("decision '{0}' is already recorded")]
    DecisionRecorded(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::ConcurrentModification {
            instance_id: InstanceId::new("v1"),
            expected: Some(3),
            actual: Some(4),
        };
        let msg = err.to_string();
        assert!(msg.contains("v1"));
        assert!(msg.contains("Some(3)"));

        let err = StoreError::NotFound {
            instance_id: InstanceId::new("v1"),
            sequence: Some(7),
        };
        assert_eq!(
            err.to_string(),
            "checkpoint not found for instance 'v1' at sequence 7"
        );

        let err = StoreError::NotFound {
            instance_id: InstanceId::new("v2"),
            sequence: None,
        };
        assert_eq!(err.to_string(), "checkpoint not found for instance 'v2'");
    }

    #[test]
    fn test_branch_error_display() {
        let err = BranchError::AlreadyDecided {
            branch: "legal".to_string(),
            decision: BranchDecision::Approved,
        };
        assert!(err.to_string().contains("legal"));
        assert!(err.to_string().contains("approved"));
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
