// Demo workflow: start -> wait 10s -> complete
//
// Each action step runs as an activity on the worker pool, so its output is
// journaled and never recomputed after a restart.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;
use waypoint_durable::{
    ActionStep, Activity, ActivityContext, DurableRuntime, JournalStore, Step, StepError,
    StepWorkflow,
};

pub const START_ACTIVITY: &str = "demo.start";
pub const COMPLETE_ACTIVITY: &str = "demo.complete";

/// Delay between the two action steps
pub const WAIT: Duration = Duration::from_secs(10);

fn blank() -> Value {
    Value::String(String::new())
}

/// Input of a demo workflow instance
///
/// Fields are carried as given, whatever their JSON type; an absent field is
/// an empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WorkflowParams {
    #[serde(default = "blank")]
    #[schema(value_type = String, example = "alice")]
    pub user: Value,

    #[serde(default = "blank")]
    #[schema(value_type = String, example = "t1")]
    pub task: Value,
}

impl Default for WorkflowParams {
    fn default() -> Self {
        Self {
            user: blank(),
            task: blank(),
        }
    }
}

impl WorkflowParams {
    /// Pick `user` and `task` out of a request body of any shape
    pub fn from_body(body: &Value) -> Self {
        let field = |name: &str| body.get(name).cloned().unwrap_or_else(blank);
        Self {
            user: field("user"),
            task: field("task"),
        }
    }
}

/// Step list of the demo workflow, with a configurable delay
pub fn steps_with_wait(params: &WorkflowParams, wait: Duration) -> Vec<Step> {
    let input = json!({ "user": params.user, "task": params.task });
    vec![
        ActionStep::new("start", START_ACTIVITY, input.clone())
            .with_result_key("started")
            .into(),
        Step::sleep("wait", wait),
        ActionStep::new("complete", COMPLETE_ACTIVITY, input)
            .with_result_key("completed")
            .into(),
    ]
}

pub struct DemoWorkflow;

impl StepWorkflow for DemoWorkflow {
    const TYPE: &'static str = "demo_workflow";
    type Params = WorkflowParams;

    fn steps(params: &WorkflowParams) -> Vec<Step> {
        steps_with_wait(params, WAIT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Started {
    pub started_by: Value,
    pub task: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completed {
    pub status: String,
    pub finished_by: Value,
}

pub struct StartActivity;

#[async_trait]
impl Activity for StartActivity {
    const NAME: &'static str = START_ACTIVITY;
    type Input = WorkflowParams;
    type Output = Started;

    async fn run(&self, ctx: &ActivityContext, input: WorkflowParams) -> Result<Started, StepError> {
        tracing::info!(workflow_id = %ctx.workflow_id, user = %input.user, "demo workflow started");
        Ok(Started {
            started_by: input.user,
            task: input.task,
        })
    }
}

pub struct CompleteActivity;

#[async_trait]
impl Activity for CompleteActivity {
    const NAME: &'static str = COMPLETE_ACTIVITY;
    type Input = WorkflowParams;
    type Output = Completed;

    async fn run(
        &self,
        ctx: &ActivityContext,
        input: WorkflowParams,
    ) -> Result<Completed, StepError> {
        tracing::info!(workflow_id = %ctx.workflow_id, user = %input.user, "demo workflow completing");
        Ok(Completed {
            status: "done".to_string(),
            finished_by: input.user,
        })
    }
}

/// Register the demo activities on a runtime's worker pool
pub fn register_activities<S: JournalStore>(runtime: &DurableRuntime<S>) {
    runtime.register_activity(StartActivity);
    runtime.register_activity(CompleteActivity);
}
