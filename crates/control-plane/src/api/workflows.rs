// Workflow HTTP routes
//
// Both handlers forward the untouched request to the shared coordinator; the
// coordinator decides what the request means.

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use waypoint_durable::InstanceStatus;

use super::{not_found, AppState};
use crate::agent::{CoordinatorError, WORKFLOW_AGENT_NAME};

/// Response to a workflow start
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflowResponse {
    /// Id of the new instance.
    #[schema(example = "01924f5e-7a3b-7c1d-9e2f-3a4b5c6d7e8f")]
    pub instance_id: String,
    /// Engine status read right after creation.
    #[schema(value_type = Object, example = json!({ "status": "running" }))]
    pub status: InstanceStatus,
}

/// Current engine status of an instance
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowStatusResponse {
    #[schema(value_type = Object, example = json!({ "status": "complete", "output": {} }))]
    pub status: InstanceStatus,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WorkflowStatusQuery {
    /// Instance id returned by `/start-workflow`.
    pub id: Option<String>,
}

/// Create workflow routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/start-workflow", post(start_workflow).fallback(not_found))
        .route("/workflow-status", get(workflow_status).fallback(not_found))
        .with_state(state)
}

async fn forward(state: &AppState, request: Request<Body>) -> Result<Response<Body>, CoordinatorError> {
    state.agents.locate(WORKFLOW_AGENT_NAME).forward(request).await
}

/// POST /start-workflow - Create a new workflow instance
#[utoipa::path(
    post,
    path = "/start-workflow",
    request_body = crate::workflows::WorkflowParams,
    responses(
        (status = 200, description = "Instance created", body = StartWorkflowResponse),
        (status = 500, description = "Malformed body or workflow engine failure")
    ),
    tag = "workflows"
)]
pub async fn start_workflow(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response<Body>, CoordinatorError> {
    forward(&state, request).await
}

/// GET /workflow-status - Read the status of an instance
#[utoipa::path(
    get,
    path = "/workflow-status",
    params(WorkflowStatusQuery),
    responses(
        (status = 200, description = "Current instance status", body = WorkflowStatusResponse),
        (status = 400, description = "Missing id", body = super::ErrorResponse),
        (status = 500, description = "Unknown instance or workflow engine failure")
    ),
    tag = "workflows"
)]
pub async fn workflow_status(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response<Body>, CoordinatorError> {
    forward(&state, request).await
}
