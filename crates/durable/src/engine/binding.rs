//! Typed handles for creating and inspecting workflow instances

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::executor::{ExecutorError, StepExecutor};
use crate::activity::StepError;
use crate::persistence::{InMemoryJournalStore, InstanceRecord, JournalStore, RunState, StoreError};
use crate::workflow::StepWorkflow;

#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    /// Malformed id, unknown id, or an instance of another workflow type
    #[error("workflow instance not found: {0}")]
    InstanceNotFound(String),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// `{"status": "running"}`, plus `output` once complete or `error` once
/// errored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub status: RunState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl From<InstanceRecord> for InstanceStatus {
    fn from(record: InstanceRecord) -> Self {
        Self {
            status: record.state,
            output: record.output,
            error: record.error,
        }
    }
}

/// What callers outside the engine hold for one workflow type
///
/// Nothing is cached here; every status read goes to the store.
pub struct WorkflowBinding<D: StepWorkflow, S: JournalStore = InMemoryJournalStore> {
    executor: Arc<StepExecutor<S>>,
    _definition: PhantomData<fn() -> D>,
}

impl<D: StepWorkflow, S: JournalStore> Clone for WorkflowBinding<D, S> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.executor))
    }
}

impl<D: StepWorkflow, S: JournalStore> WorkflowBinding<D, S> {
    pub fn new(executor: Arc<StepExecutor<S>>) -> Self {
        Self {
            executor,
            _definition: PhantomData,
        }
    }

    /// Start a new instance under `id`; a taken id is a store error
    pub async fn create(
        &self,
        id: Uuid,
        params: D::Params,
    ) -> Result<WorkflowInstanceHandle<S>, BindingError> {
        self.executor.start::<D>(id, params).await?;
        Ok(self.handle(id))
    }

    pub async fn get(&self, id: &str) -> Result<WorkflowInstanceHandle<S>, BindingError> {
        let not_found = || BindingError::InstanceNotFound(id.to_string());

        let uuid = Uuid::parse_str(id).map_err(|_| not_found())?;
        let record = match self.executor.store().instance(uuid).await {
            Err(StoreError::UnknownInstance(_)) => return Err(not_found()),
            other => other?,
        };

        if record.workflow_type != D::TYPE {
            debug!(
                workflow_id = %uuid,
                found = %record.workflow_type,
                wanted = D::TYPE,
                "id belongs to another workflow type"
            );
            return Err(not_found());
        }
        Ok(self.handle(uuid))
    }

    fn handle(&self, id: Uuid) -> WorkflowInstanceHandle<S> {
        WorkflowInstanceHandle {
            id,
            store: self.executor.shared_store(),
        }
    }
}

pub struct WorkflowInstanceHandle<S: JournalStore = InMemoryJournalStore> {
    id: Uuid,
    store: Arc<S>,
}

impl<S: JournalStore> WorkflowInstanceHandle<S> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn status(&self) -> Result<InstanceStatus, BindingError> {
        Ok(self.store.instance(self.id).await?.into())
    }
}

impl<S: JournalStore> Clone for WorkflowInstanceHandle<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: JournalStore> fmt::Debug for WorkflowInstanceHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkflowInstanceHandle({})", self.id)
    }
}
