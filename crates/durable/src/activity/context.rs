use uuid::Uuid;

use crate::persistence::ClaimedTask;

/// What an activity knows about the try it is running in
#[derive(Debug, Clone)]
pub struct ActivityContext {
    pub workflow_id: Uuid,
    /// Name of the action step being run
    pub step: String,
    /// 1 on the first try
    pub attempt: u32,
    pub max_attempts: u32,
    pub worker_id: String,
}

impl ActivityContext {
    pub fn new(workflow_id: Uuid, step: impl Into<String>, attempt: u32, max_attempts: u32) -> Self {
        Self {
            workflow_id,
            step: step.into(),
            attempt,
            max_attempts,
            worker_id: String::new(),
        }
    }

    pub(crate) fn for_task(task: &ClaimedTask, worker_id: &str) -> Self {
        Self {
            workflow_id: task.workflow_id,
            step: task.step.clone(),
            attempt: task.attempt,
            max_attempts: task.options.retry.attempts,
            worker_id: worker_id.to_string(),
        }
    }
}
