//! Drives step workflows from their journals
//!
//! Every delivery (an action try starting, succeeding or failing, a sleep
//! elapsing) follows the same path: load the record and journal, rebuild the
//! step list from the stored params, replay, append the entry if it is news,
//! and enact whatever comes next when the run crossed a step boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::activity::StepError;
use crate::persistence::{JournalStore, NewTask, RunState, StoreError};
use crate::workflow::{
    duplicate_name, JournalEntry, Next, Progress, Step, StepWorkflow, DUPLICATE_STEP,
    SLEEP_OUT_OF_RANGE,
};

type Plan = Box<dyn Fn(&Value) -> Result<Vec<Step>, serde_json::Error> + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Deliveries to a run whose journal reached this size are refused
    pub journal_limit: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            journal_limit: 10_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("workflow type {0} is not registered")]
    UnknownType(String),

    #[error("params could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("stored params do not fit workflow type {workflow_type}: {source}")]
    BadParams {
        workflow_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("journal of {0} does not open with a start entry")]
    CorruptJournal(Uuid),

    #[error("journal of {id} reached its limit of {limit} entries")]
    JournalFull { id: Uuid, limit: usize },
}

/// Outcome of one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Recorded,
    /// Stale, duplicated, or addressed to a finished run
    Dropped,
}

/// What [`StepExecutor::recover`] found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub open_instances: usize,
    /// Queued instances whose first step was enacted during recovery
    pub restarted: usize,
    pub pending_timers: usize,
    pub open_tasks: usize,
}

pub struct StepExecutor<S: JournalStore> {
    store: Arc<S>,
    plans: HashMap<String, Plan>,
    config: ExecutorConfig,
}

impl<S: JournalStore> StepExecutor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            plans: HashMap::new(),
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Make a workflow type startable and replayable
    pub fn register<D: StepWorkflow>(&mut self) {
        let plan: Plan = Box::new(|params: &Value| {
            let params: D::Params = serde_json::from_value(params.clone())?;
            Ok(D::steps(&params))
        });
        self.plans.insert(D::TYPE.to_string(), plan);
        debug!(workflow_type = D::TYPE, "registered step workflow");
    }

    pub fn is_registered(&self, workflow_type: &str) -> bool {
        self.plans.contains_key(workflow_type)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn shared_store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    fn plan(&self, workflow_type: &str, params: &Value) -> Result<Vec<Step>, ExecutorError> {
        let plan = self
            .plans
            .get(workflow_type)
            .ok_or_else(|| ExecutorError::UnknownType(workflow_type.to_string()))?;
        plan(params).map_err(|source| ExecutorError::BadParams {
            workflow_type: workflow_type.to_string(),
            source,
        })
    }

    /// Create an instance under `id` and enact its first step
    #[instrument(skip(self, params), fields(workflow_type = D::TYPE))]
    pub async fn start<D: StepWorkflow>(
        &self,
        id: Uuid,
        params: D::Params,
    ) -> Result<RunState, ExecutorError> {
        let params = serde_json::to_value(&params)?;
        let steps = self.plan(D::TYPE, &params)?;

        self.store.create_instance(id, D::TYPE, params.clone()).await?;
        let len = self.store.append(id, 0, JournalEntry::Started { params }).await?;
        info!(workflow_id = %id, steps = steps.len(), "workflow instance created");

        self.begin(id, &steps, len).await
    }

    pub async fn step_attempted(
        &self,
        id: Uuid,
        step: &str,
        attempt: u32,
        worker: &str,
    ) -> Result<Delivery, ExecutorError> {
        let entry = JournalEntry::ActionAttempted {
            step: step.to_string(),
            attempt,
            worker: worker.to_string(),
        };
        self.deliver(id, entry).await
    }

    pub async fn step_succeeded(
        &self,
        id: Uuid,
        step: &str,
        output: Value,
    ) -> Result<Delivery, ExecutorError> {
        let entry = JournalEntry::ActionSucceeded {
            step: step.to_string(),
            output,
        };
        self.deliver(id, entry).await
    }

    /// `retrying` says whether another try of the step is already queued
    pub async fn step_failed(
        &self,
        id: Uuid,
        step: &str,
        error: StepError,
        retrying: bool,
    ) -> Result<Delivery, ExecutorError> {
        let entry = JournalEntry::ActionFailed {
            step: step.to_string(),
            error,
            retrying,
        };
        self.deliver(id, entry).await
    }

    pub async fn sleep_elapsed(&self, id: Uuid, step: &str) -> Result<Delivery, ExecutorError> {
        let entry = JournalEntry::SleepElapsed {
            step: step.to_string(),
        };
        self.deliver(id, entry).await
    }

    /// Restart queued instances that never got past their start entry
    ///
    /// Everything else resumes without help: queued tasks are claimed by the
    /// next worker pool and timers fire from their stored wake-up time.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryReport, ExecutorError> {
        let open = self.store.open_instances().await?;
        let mut report = RecoveryReport {
            open_instances: open.len(),
            ..RecoveryReport::default()
        };

        for record in open {
            if record.state != RunState::Queued {
                continue;
            }

            let steps = match self.plan(&record.workflow_type, &record.params) {
                Ok(steps) => steps,
                Err(e) => {
                    warn!(workflow_id = %record.id, error = %e, "cannot resume instance");
                    continue;
                }
            };

            let journal = self.store.journal(record.id).await?;
            let len = match journal.as_slice() {
                [] => {
                    let started = JournalEntry::Started {
                        params: record.params.clone(),
                    };
                    self.store.append(record.id, 0, started).await?
                }
                [JournalEntry::Started { .. }] => 1,
                _ => continue,
            };

            self.begin(record.id, &steps, len).await?;
            report.restarted += 1;
            info!(workflow_id = %record.id, "resumed queued instance");
        }

        report.pending_timers = self.store.pending_timer_count().await?;
        report.open_tasks = self.store.open_task_count().await?;
        info!(?report, "recovery finished");
        Ok(report)
    }

    async fn begin(&self, id: Uuid, steps: &[Step], len: usize) -> Result<RunState, ExecutorError> {
        let next = match duplicate_name(steps) {
            Some(name) => Next::Abort(
                StepError::permanent(format!("step name '{name}' is used more than once"))
                    .with_code(DUPLICATE_STEP),
            ),
            None => Progress::default().next(steps),
        };
        self.enact(id, len, next).await
    }

    #[instrument(skip(self, entry), fields(step = entry.step()))]
    async fn deliver(&self, id: Uuid, entry: JournalEntry) -> Result<Delivery, ExecutorError> {
        let record = self.store.instance(id).await?;
        if record.state.is_terminal() {
            debug!(workflow_id = %id, state = %record.state, "run is over, dropping entry");
            return Ok(Delivery::Dropped);
        }

        let journal = self.store.journal(id).await?;
        if !matches!(journal.first(), Some(JournalEntry::Started { .. })) {
            return Err(ExecutorError::CorruptJournal(id));
        }
        if journal.len() >= self.config.journal_limit {
            return Err(ExecutorError::JournalFull {
                id,
                limit: self.config.journal_limit,
            });
        }

        let steps = self.plan(&record.workflow_type, &record.params)?;
        let mut progress = Progress::replay(&steps, &journal);
        if !progress.accepts(&steps, &entry) {
            debug!(workflow_id = %id, "stale or duplicate entry dropped");
            return Ok(Delivery::Dropped);
        }

        let len = self.store.append(id, journal.len(), entry.clone()).await?;
        if progress.apply(&steps, &entry) {
            self.enact(id, len, progress.next(&steps)).await?;
        }
        Ok(Delivery::Recorded)
    }

    async fn enact(&self, id: Uuid, len: usize, next: Next) -> Result<RunState, ExecutorError> {
        match next {
            Next::Run(action) => {
                let queued = JournalEntry::ActionQueued {
                    step: action.name.clone(),
                    activity: action.activity.clone(),
                    input: action.input.clone(),
                };
                self.store.append(id, len, queued).await?;
                self.store.set_state(id, RunState::Running, None, None).await?;
                self.store
                    .push_task(NewTask {
                        workflow_id: id,
                        step: action.name.clone(),
                        activity: action.activity.clone(),
                        input: action.input,
                        options: action.options,
                    })
                    .await?;
                debug!(workflow_id = %id, step = %action.name, activity = %action.activity, "action queued");
                Ok(RunState::Running)
            }
            Next::Sleep(sleep) => match wake_time(Utc::now(), sleep.duration) {
                Some(wake_at) => {
                    let started = JournalEntry::SleepStarted {
                        step: sleep.name.clone(),
                        wake_at,
                    };
                    self.store.append(id, len, started).await?;
                    self.store.set_state(id, RunState::Waiting, None, None).await?;
                    self.store.add_timer(id, &sleep.name, wake_at).await?;
                    debug!(workflow_id = %id, step = %sleep.name, %wake_at, "sleeping");
                    Ok(RunState::Waiting)
                }
                None => {
                    let error = StepError::permanent(format!(
                        "sleep '{}' of {:?} ends past the supported calendar",
                        sleep.name, sleep.duration
                    ))
                    .with_code(SLEEP_OUT_OF_RANGE);
                    self.abort(id, len, error).await
                }
            },
            Next::Finish(output) => {
                let finished = JournalEntry::Finished {
                    output: output.clone(),
                };
                self.store.append(id, len, finished).await?;
                self.store
                    .set_state(id, RunState::Complete, Some(output), None)
                    .await?;
                info!(workflow_id = %id, "workflow complete");
                Ok(RunState::Complete)
            }
            Next::Abort(error) => self.abort(id, len, error).await,
        }
    }

    async fn abort(&self, id: Uuid, len: usize, error: StepError) -> Result<RunState, ExecutorError> {
        warn!(workflow_id = %id, error = %error, code = ?error.code, "workflow errored");
        let aborted = JournalEntry::Aborted {
            error: error.clone(),
        };
        self.store.append(id, len, aborted).await?;
        self.store
            .set_state(id, RunState::Errored, None, Some(error))
            .await?;
        Ok(RunState::Errored)
    }
}

/// `None` when the wake-up time cannot be represented
fn wake_time(now: DateTime<Utc>, after: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|after| now.checked_add_signed(after))
}
