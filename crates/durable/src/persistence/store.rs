//! Storage seam of the engine
//!
//! A [`JournalStore`] keeps four things: one record per instance, the
//! instance's journal, the queue of action tries waiting for a worker, and
//! the timers of pending sleeps.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::activity::StepError;
use crate::workflow::{JournalEntry, StepOptions};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no workflow instance {0}")]
    UnknownInstance(Uuid),

    #[error("workflow instance {0} already exists")]
    DuplicateInstance(Uuid),

    #[error("no task {0}")]
    UnknownTask(Uuid),

    #[error("no timer {0}")]
    UnknownTimer(Uuid),

    /// Someone else appended first
    #[error("journal of {instance} has {actual} entries, expected {expected}")]
    JournalConflict {
        instance: Uuid,
        expected: usize,
        actual: usize,
    },
}

/// Lifecycle state of an instance
///
/// `queued` until the first step is enacted, `running` while an action is
/// outstanding, `waiting` during a sleep, then `complete` or `errored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    Waiting,
    Complete,
    Errored,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Errored)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Complete => "complete",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub id: Uuid,
    pub workflow_type: String,
    pub params: Value,
    pub state: RunState,
    /// Set once `complete`
    pub output: Option<Value>,
    /// Set once `errored`
    pub error: Option<StepError>,
    pub created_at: DateTime<Utc>,
}

/// An action try to queue
#[derive(Debug, Clone)]
pub struct NewTask {
    pub workflow_id: Uuid,
    pub step: String,
    pub activity: String,
    pub input: Value,
    pub options: StepOptions,
}

/// A try handed to a worker
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub step: String,
    pub activity: String,
    pub input: Value,
    pub options: StepOptions,
    /// 1 on the first try
    pub attempt: u32,
}

/// What happens to a task after a failed try
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Queued again; claimable after `after`
    Retry { attempt: u32, after: Duration },
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct PendingTimer {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Name of the sleep step
    pub step: String,
    pub wake_at: DateTime<Utc>,
}

#[async_trait]
pub trait JournalStore: Send + Sync + 'static {
    // Instances

    async fn create_instance(
        &self,
        id: Uuid,
        workflow_type: &str,
        params: Value,
    ) -> Result<(), StoreError>;

    async fn instance(&self, id: Uuid) -> Result<InstanceRecord, StoreError>;

    async fn set_state(
        &self,
        id: Uuid,
        state: RunState,
        output: Option<Value>,
        error: Option<StepError>,
    ) -> Result<(), StoreError>;

    /// Instances not yet `complete` or `errored`
    async fn open_instances(&self) -> Result<Vec<InstanceRecord>, StoreError>;

    // Journal

    async fn journal(&self, id: Uuid) -> Result<Vec<JournalEntry>, StoreError>;

    /// Append one entry if the journal still holds exactly `expected_len`
    /// entries; returns the new length
    async fn append(
        &self,
        id: Uuid,
        expected_len: usize,
        entry: JournalEntry,
    ) -> Result<usize, StoreError>;

    // Task queue

    async fn push_task(&self, task: NewTask) -> Result<Uuid, StoreError>;

    /// Claim up to `limit` ready tasks for the given activities, oldest first
    async fn claim_tasks(
        &self,
        activities: &[String],
        limit: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError>;

    async fn finish_task(&self, id: Uuid) -> Result<(), StoreError>;

    /// Record a failed try and decide on the next one from the task's policy
    async fn fail_task(&self, id: Uuid, error: &StepError) -> Result<RetryDecision, StoreError>;

    /// Put back claims older than `older_than`; returns how many
    async fn release_stale_tasks(&self, older_than: Duration) -> Result<usize, StoreError>;

    /// Tasks queued or claimed
    async fn open_task_count(&self) -> Result<usize, StoreError>;

    // Timers

    async fn add_timer(
        &self,
        workflow_id: Uuid,
        step: &str,
        wake_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError>;

    /// Unfired timers with `wake_at <= now`, earliest first
    async fn due_timers(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PendingTimer>, StoreError>;

    async fn clear_timer(&self, id: Uuid) -> Result<(), StoreError>;

    async fn pending_timer_count(&self) -> Result<usize, StoreError>;
}
