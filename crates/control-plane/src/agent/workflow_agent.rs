// Coordinator that starts and inspects demo workflow instances

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Query;
use axum::http::{Method, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::Value;
use uuid::Uuid;
use waypoint_durable::{StepWorkflow, WorkflowBinding};

use super::{Coordinator, CoordinatorError};
use crate::api::workflows::{StartWorkflowResponse, WorkflowStatusResponse};
use crate::api::ErrorResponse;
use crate::workflows::{DemoWorkflow, WorkflowParams};

/// Name every request is routed to, so all of them share one coordinator
pub const WORKFLOW_AGENT_NAME: &str = "workflow-agent";

/// Largest start body read; anything bigger fails as an unreadable body
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Translates raw requests into workflow engine calls
///
/// Holds no state of its own: every status is read from the engine.
pub struct WorkflowAgent<D = DemoWorkflow>
where
    D: StepWorkflow<Params = WorkflowParams>,
{
    workflows: WorkflowBinding<D>,
}

impl<D: StepWorkflow<Params = WorkflowParams>> WorkflowAgent<D> {
    pub fn new(workflows: WorkflowBinding<D>) -> Self {
        Self { workflows }
    }

    /// POST /start-workflow
    ///
    /// Any well-formed JSON body is accepted; `user` and `task` are passed on
    /// as they are. Each call creates a new instance, identical bodies
    /// included.
    async fn start_workflow(
        &self,
        request: Request<Body>,
    ) -> Result<Response<Body>, CoordinatorError> {
        let bytes = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await?;
        let body: Value = serde_json::from_slice(&bytes)?;
        let params = WorkflowParams::from_body(&body);

        let id = Uuid::now_v7();
        let instance = self.workflows.create(id, params).await?;
        let status = instance.status().await?;

        tracing::info!(instance_id = %id, status = %status.status, "workflow instance created");

        Ok(Json(StartWorkflowResponse {
            instance_id: id.to_string(),
            status,
        })
        .into_response())
    }

    /// GET /workflow-status?id=<id>
    async fn workflow_status(
        &self,
        request: Request<Body>,
    ) -> Result<Response<Body>, CoordinatorError> {
        let Some(id) = requested_id(request.uri()) else {
            return Ok(ErrorResponse::reply(StatusCode::BAD_REQUEST, "Missing id"));
        };

        let instance = self.workflows.get(&id).await?;
        let status = instance.status().await?;

        Ok(Json(WorkflowStatusResponse { status }).into_response())
    }
}

/// First `id` in the query string; empty counts as absent
fn requested_id(uri: &Uri) -> Option<String> {
    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri).ok()?;
    pairs
        .into_iter()
        .find_map(|(key, value)| (key == "id").then_some(value))
        .filter(|id| !id.is_empty())
}

#[async_trait]
impl<D: StepWorkflow<Params = WorkflowParams>> Coordinator for WorkflowAgent<D> {
    async fn on_request(&self, request: Request<Body>) -> Result<Response<Body>, CoordinatorError> {
        match (request.method(), request.uri().path()) {
            (&Method::POST, "/start-workflow") => self.start_workflow(request).await,
            (&Method::GET, "/workflow-status") => self.workflow_status(request).await,
            _ => Ok(ErrorResponse::not_found()),
        }
    }
}
