//! Workflow instance handlers for the REST API.
//!
//! Endpoints for starting instances, resuming them with external input
//! (approval decisions), and inspecting state, audit trail and checkpoint
//! history.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use procura_core::workflows::{purchase_order, vendor_onboarding};
use procura_types::workflow::{
    BusinessRecord, Checkpoint, InstanceId, TransitionRecord, WorkflowInstance, WorkflowType,
};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Body of `POST /instances`.
#[derive(Debug, Deserialize)]
pub struct StartInstanceRequest {
    pub workflow_type: WorkflowType,
    /// Caller-chosen id; a UUIDv7 is generated when omitted.
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default = "empty_object")]
    pub payload: Value,
}

/// Body of the decision endpoints.
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub approved: bool,
    pub decided_by: String,
    #[serde(default)]
    pub comments: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn instance_links(resp: ApiResponse<WorkflowInstance>, id: &InstanceId) -> ApiResponse<WorkflowInstance> {
    resp.with_link("self", &format!("/api/v1/instances/{id}"))
        .with_link("transitions", &format!("/api/v1/instances/{id}/transitions"))
        .with_link("checkpoints", &format!("/api/v1/instances/{id}/checkpoints"))
}

fn validate_decision(body: &DecisionRequest) -> Result<(), AppError> {
    if body.decided_by.trim().is_empty() {
        return Err(AppError::Validation("decided_by must not be empty".to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/v1/workflows - Workflow types the engine can start.
pub async fn list_workflow_types(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WorkflowType>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let types = state.engine.workflow_types();

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(
        ApiResponse::success(types, request_id, elapsed).with_link("self", "/api/v1/workflows"),
    ))
}

/// POST /api/v1/instances - Start a workflow instance and run it until it halts.
pub async fn start_instance(
    State(state): State<AppState>,
    Json(body): Json<StartInstanceRequest>,
) -> Result<Json<ApiResponse<WorkflowInstance>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let instance_id = match body.instance_id {
        Some(id) if id.trim().is_empty() => {
            return Err(AppError::Validation("instance_id must not be blank".to_string()));
        }
        Some(id) => Some(InstanceId::new(id)),
        None => None,
    };

    let instance = state
        .engine
        .start(body.workflow_type, instance_id, &body.payload)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let id = instance.instance_id.clone();
    Ok(Json(instance_links(
        ApiResponse::success(instance, request_id, elapsed),
        &id,
    )))
}

/// GET /api/v1/instances/{id} - Latest checkpointed state.
pub async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<WorkflowInstance>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let id = InstanceId::new(id);

    let instance = state.engine.get_state(&id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(instance_links(
        ApiResponse::success(instance, request_id, elapsed),
        &id,
    )))
}

/// POST /api/v1/instances/{id}/resume - Merge arbitrary input and continue.
pub async fn resume_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<Value>,
) -> Result<Json<ApiResponse<WorkflowInstance>>, AppError> {
    resume_with(&state, InstanceId::new(id), &input).await
}

/// POST /api/v1/instances/{id}/central-decision - Central procurement decision.
pub async fn central_decision(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DecisionRequest>,
) -> Result<Json<ApiResponse<WorkflowInstance>>, AppError> {
    validate_decision(&body)?;
    let input = vendor_onboarding::central_decision_input(
        body.approved,
        &body.decided_by,
        body.comments.as_deref(),
    );
    resume_with(&state, InstanceId::new(id), &input).await
}

/// POST /api/v1/instances/{id}/department-decisions/{branch} - One department's decision.
pub async fn department_decision(
    State(state): State<AppState>,
    Path((id, branch)): Path<(String, String)>,
    Json(body): Json<DecisionRequest>,
) -> Result<Json<ApiResponse<WorkflowInstance>>, AppError> {
    validate_decision(&body)?;
    let input = vendor_onboarding::department_decision_input(
        &branch,
        body.approved,
        &body.decided_by,
        body.comments.as_deref(),
    );
    resume_with(&state, InstanceId::new(id), &input).await
}

/// POST /api/v1/instances/{id}/level-decision - Purchase order approval at the routed level.
pub async fn level_decision(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DecisionRequest>,
) -> Result<Json<ApiResponse<WorkflowInstance>>, AppError> {
    validate_decision(&body)?;
    let input =
        purchase_order::level_decision_input(body.approved, &body.decided_by, body.comments.as_deref());
    resume_with(&state, InstanceId::new(id), &input).await
}

async fn resume_with(
    state: &AppState,
    id: InstanceId,
    input: &Value,
) -> Result<Json<ApiResponse<WorkflowInstance>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let instance = state.engine.resume(&id, input).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(instance_links(
        ApiResponse::success(instance, request_id, elapsed),
        &id,
    )))
}

/// POST /api/v1/instances/{id}/reconcile - Re-drive the projection for the latest checkpoint.
pub async fn reconcile_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<WorkflowInstance>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let id = InstanceId::new(id);

    let instance = state.engine.reconcile(&id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(instance_links(
        ApiResponse::success(instance, request_id, elapsed),
        &id,
    )))
}

/// GET /api/v1/instances/{id}/record - Projected business record.
pub async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<BusinessRecord>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let id = InstanceId::new(id);

    let record = state.engine.business_record(&id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(
        ApiResponse::success(record, request_id, elapsed)
            .with_link("self", &format!("/api/v1/instances/{id}/record"))
            .with_link("instance", &format!("/api/v1/instances/{id}")),
    ))
}

/// GET /api/v1/instances/{id}/transitions - Status change audit trail.
pub async fn list_transitions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<TransitionRecord>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let id = InstanceId::new(id);

    let transitions = state.engine.transitions(&id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(
        ApiResponse::success(transitions, request_id, elapsed)
            .with_link("self", &format!("/api/v1/instances/{id}/transitions")),
    ))
}

/// GET /api/v1/instances/{id}/checkpoints - Every checkpoint ordered by sequence.
pub async fn list_checkpoints(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<Checkpoint>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let id = InstanceId::new(id);

    let history = state.engine.history(&id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(
        ApiResponse::success(history, request_id, elapsed)
            .with_link("self", &format!("/api/v1/instances/{id}/checkpoints")),
    ))
}

/// GET /api/v1/instances/{id}/checkpoints/{sequence} - One checkpoint.
pub async fn get_checkpoint(
    State(state): State<AppState>,
    Path((id, sequence)): Path<(String, u64)>,
) -> Result<Json<ApiResponse<Checkpoint>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let id = InstanceId::new(id);

    let checkpoint = state.engine.checkpoint_at(&id, sequence).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(
        ApiResponse::success(checkpoint, request_id, elapsed)
            .with_link("self", &format!("/api/v1/instances/{id}/checkpoints/{sequence}"))
            .with_link("instance", &format!("/api/v1/instances/{id}")),
    ))
}
