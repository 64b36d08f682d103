//! Built-in procurement workflow graphs.

pub mod purchase_order;
pub mod vendor_onboarding;

use std::sync::Arc;

use procura_types::config::EngineConfig;
use procura_types::workflow::WorkflowInstance;

use crate::collaborator::BoxRiskAssessor;
use crate::graph::{GraphDefinition, GraphError, NodeError};

/// Compile every built-in graph from configuration.
pub fn builtin_graphs(
    config: &EngineConfig,
    assessor: BoxRiskAssessor,
) -> Result<Vec<GraphDefinition>, GraphError> {
    Ok(vec![
        vendor_onboarding::graph(&config.vendor_onboarding, Arc::new(assessor))?,
        purchase_order::graph(&config.purchase_order)?,
    ])
}

fn wrong_payload(instance: &WorkflowInstance) -> NodeError {
    NodeError::WrongPayload(instance.workflow_type())
}
