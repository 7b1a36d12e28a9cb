use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use super::store::{
    ClaimedTask, InstanceRecord, JournalStore, NewTask, PendingTimer, RetryDecision, RunState,
    StoreError,
};
use crate::activity::StepError;
use crate::workflow::JournalEntry;

struct Instance {
    record: InstanceRecord,
    journal: Vec<JournalEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready { at: DateTime<Utc> },
    Claimed { at: DateTime<Utc> },
    Finished,
    Dead,
}

struct Task {
    queued: NewTask,
    attempt: u32,
    phase: Phase,
    last_error: Option<StepError>,
}

struct Timer {
    workflow_id: Uuid,
    step: String,
    wake_at: DateTime<Utc>,
    cleared: bool,
}

#[derive(Default)]
struct Tables {
    instances: HashMap<Uuid, Instance>,
    tasks: HashMap<Uuid, Task>,
    timers: HashMap<Uuid, Timer>,
}

/// Process-local [`JournalStore`]
///
/// Everything lives behind one lock. Instances outlive a runtime as long as
/// the store value does, which is what restart tests rely on.
#[derive(Default)]
pub struct InMemoryJournalStore {
    tables: Mutex<Tables>,
}

impl InMemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_count(&self) -> usize {
        self.tables.lock().instances.len()
    }

    /// Tasks waiting for a worker, claimable now or later
    pub fn ready_task_count(&self) -> usize {
        self.tables
            .lock()
            .tasks
            .values()
            .filter(|task| matches!(task.phase, Phase::Ready { .. }))
            .count()
    }

    pub fn task_error(&self, id: Uuid) -> Option<StepError> {
        self.tables
            .lock()
            .tasks
            .get(&id)
            .and_then(|task| task.last_error.clone())
    }
}

/// `at + by`, saturating at the end of the calendar
fn shifted(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl JournalStore for InMemoryJournalStore {
    async fn create_instance(
        &self,
        id: Uuid,
        workflow_type: &str,
        params: Value,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if tables.instances.contains_key(&id) {
            return Err(StoreError::DuplicateInstance(id));
        }

        let record = InstanceRecord {
            id,
            workflow_type: workflow_type.to_string(),
            params,
            state: RunState::Queued,
            output: None,
            error: None,
            created_at: Utc::now(),
        };
        tables.instances.insert(
            id,
            Instance {
                record,
                journal: Vec::new(),
            },
        );
        Ok(())
    }

    async fn instance(&self, id: Uuid) -> Result<InstanceRecord, StoreError> {
        self.tables
            .lock()
            .instances
            .get(&id)
            .map(|instance| instance.record.clone())
            .ok_or(StoreError::UnknownInstance(id))
    }

    async fn set_state(
        &self,
        id: Uuid,
        state: RunState,
        output: Option<Value>,
        error: Option<StepError>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let instance = tables
            .instances
            .get_mut(&id)
            .ok_or(StoreError::UnknownInstance(id))?;

        let record = &mut instance.record;
        record.state = state;
        if output.is_some() {
            record.output = output;
        }
        if error.is_some() {
            record.error = error;
        }
        Ok(())
    }

    async fn open_instances(&self) -> Result<Vec<InstanceRecord>, StoreError> {
        let tables = self.tables.lock();
        let mut open: Vec<_> = tables
            .instances
            .values()
            .filter(|instance| !instance.record.state.is_terminal())
            .map(|instance| instance.record.clone())
            .collect();
        open.sort_by_key(|record| (record.created_at, record.id));
        Ok(open)
    }

    async fn journal(&self, id: Uuid) -> Result<Vec<JournalEntry>, StoreError> {
        self.tables
            .lock()
            .instances
            .get(&id)
            .map(|instance| instance.journal.clone())
            .ok_or(StoreError::UnknownInstance(id))
    }

    async fn append(
        &self,
        id: Uuid,
        expected_len: usize,
        entry: JournalEntry,
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables.lock();
        let instance = tables
            .instances
            .get_mut(&id)
            .ok_or(StoreError::UnknownInstance(id))?;

        let actual = instance.journal.len();
        if actual != expected_len {
            return Err(StoreError::JournalConflict {
                instance: id,
                expected: expected_len,
                actual,
            });
        }

        instance.journal.push(entry);
        Ok(actual + 1)
    }

    async fn push_task(&self, task: NewTask) -> Result<Uuid, StoreError> {
        let id = Uuid::now_v7();
        self.tables.lock().tasks.insert(
            id,
            Task {
                queued: task,
                attempt: 1,
                phase: Phase::Ready { at: Utc::now() },
                last_error: None,
            },
        );
        Ok(id)
    }

    async fn claim_tasks(
        &self,
        activities: &[String],
        limit: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError> {
        let now = Utc::now();
        let mut tables = self.tables.lock();

        let mut ready: Vec<(DateTime<Utc>, Uuid)> = tables
            .tasks
            .iter()
            .filter_map(|(id, task)| match task.phase {
                Phase::Ready { at } if at <= now && activities.contains(&task.queued.activity) => {
                    Some((at, *id))
                }
                _ => None,
            })
            .collect();
        ready.sort();
        ready.truncate(limit);

        let mut claimed = Vec::with_capacity(ready.len());
        for (_, id) in ready {
            if let Some(task) = tables.tasks.get_mut(&id) {
                task.phase = Phase::Claimed { at: now };
                claimed.push(ClaimedTask {
                    id,
                    workflow_id: task.queued.workflow_id,
                    step: task.queued.step.clone(),
                    activity: task.queued.activity.clone(),
                    input: task.queued.input.clone(),
                    options: task.queued.options.clone(),
                    attempt: task.attempt,
                });
            }
        }
        Ok(claimed)
    }

    async fn finish_task(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let task = tables.tasks.get_mut(&id).ok_or(StoreError::UnknownTask(id))?;
        task.phase = Phase::Finished;
        Ok(())
    }

    async fn fail_task(&self, id: Uuid, error: &StepError) -> Result<RetryDecision, StoreError> {
        let mut tables = self.tables.lock();
        let task = tables.tasks.get_mut(&id).ok_or(StoreError::UnknownTask(id))?;
        task.last_error = Some(error.clone());

        let policy = &task.queued.options.retry;
        if !policy.allows_retry(task.attempt, error) {
            task.phase = Phase::Dead;
            return Ok(RetryDecision::GiveUp);
        }

        task.attempt += 1;
        let after = policy.backoff(task.attempt);
        task.phase = Phase::Ready {
            at: shifted(Utc::now(), after),
        };
        Ok(RetryDecision::Retry {
            attempt: task.attempt,
            after,
        })
    }

    async fn release_stale_tasks(&self, older_than: Duration) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut released = 0;

        for task in self.tables.lock().tasks.values_mut() {
            let Phase::Claimed { at } = task.phase else {
                continue;
            };
            let stale = (now - at).to_std().is_ok_and(|age| age >= older_than);
            if stale {
                task.phase = Phase::Ready { at: now };
                released += 1;
            }
        }
        Ok(released)
    }

    async fn open_task_count(&self) -> Result<usize, StoreError> {
        let open = self
            .tables
            .lock()
            .tasks
            .values()
            .filter(|task| matches!(task.phase, Phase::Ready { .. } | Phase::Claimed { .. }))
            .count();
        Ok(open)
    }

    async fn add_timer(
        &self,
        workflow_id: Uuid,
        step: &str,
        wake_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::now_v7();
        self.tables.lock().timers.insert(
            id,
            Timer {
                workflow_id,
                step: step.to_string(),
                wake_at,
                cleared: false,
            },
        );
        Ok(id)
    }

    async fn due_timers(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PendingTimer>, StoreError> {
        let tables = self.tables.lock();
        let mut due: Vec<_> = tables
            .timers
            .iter()
            .filter(|(_, timer)| !timer.cleared && timer.wake_at <= now)
            .map(|(id, timer)| PendingTimer {
                id: *id,
                workflow_id: timer.workflow_id,
                step: timer.step.clone(),
                wake_at: timer.wake_at,
            })
            .collect();
        due.sort_by_key(|timer| (timer.wake_at, timer.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn clear_timer(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let timer = tables.timers.get_mut(&id).ok_or(StoreError::UnknownTimer(id))?;
        timer.cleared = true;
        Ok(())
    }

    async fn pending_timer_count(&self) -> Result<usize, StoreError> {
        let pending = self
            .tables
            .lock()
            .timers
            .values()
            .filter(|timer| !timer.cleared)
            .count();
        Ok(pending)
    }
}
