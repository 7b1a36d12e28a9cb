// OpenAPI specification generation
//
// Describes the two workflow operations. The document is exported by the
// export-openapi binary; the server does not serve it.

use crate::api;
use crate::workflows::WorkflowParams;
use utoipa::OpenApi;

/// OpenAPI documentation for the Waypoint API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::workflows::start_workflow,
        api::workflows::workflow_status,
    ),
    components(
        schemas(
            WorkflowParams,
            api::workflows::StartWorkflowResponse,
            api::workflows::WorkflowStatusResponse,
            api::ErrorResponse,
        )
    ),
    tags(
        (name = "workflows", description = "Start durable workflows and read their status")
    ),
    info(
        title = "Waypoint API",
        version = "0.1.0",
        description = "Starts demo step workflows on the durable engine and reports their status",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> Result<String, serde_json::Error> {
        Self::openapi().to_pretty_json()
    }
}
