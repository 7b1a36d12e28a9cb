// Waypoint Control Plane Library
// Decision: Shared library for binaries (API server, OpenAPI export) and tests

// Named coordinators that receive forwarded requests
pub mod agent;

// API routes and types (shared for OpenAPI generation)
pub mod api;

pub mod config;

// OpenAPI spec generation
pub mod openapi;

pub mod logging;

// Workflow definitions and their activities
pub mod workflows;

use std::sync::Arc;

use axum::Router;
use waypoint_durable::{DurableRuntime, RuntimeConfig, StepWorkflow};

use crate::agent::{CoordinatorNamespace, WorkflowAgent};
use crate::workflows::{DemoWorkflow, WorkflowParams};

/// Engine and router wired together, not yet serving
pub struct App {
    pub runtime: Arc<DurableRuntime>,
    pub router: Router,
}

/// Assemble the demo application
pub fn build_app(runtime_config: RuntimeConfig, api_prefix: &str) -> App {
    build_app_with::<DemoWorkflow>(runtime_config, api_prefix)
}

/// Assemble the application around any workflow taking demo parameters
pub fn build_app_with<D>(runtime_config: RuntimeConfig, api_prefix: &str) -> App
where
    D: StepWorkflow<Params = WorkflowParams>,
{
    let runtime = DurableRuntime::in_memory(runtime_config)
        .workflow::<D>()
        .build();
    workflows::register_activities(&runtime);
    let runtime = Arc::new(runtime);

    let binding = runtime.binding::<D>();
    let agents = CoordinatorNamespace::new(move |_name| WorkflowAgent::new(binding.clone()));
    let router = api::router(api::AppState::new(agents), api_prefix);

    App { runtime, router }
}
