//! Per-instance journal and replay
//!
//! Everything that happens to a run is appended to its journal. Where the run
//! stands is never stored: [`Progress::replay`] folds the journal over the
//! step list each time an entry arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::steps::{ActionStep, SleepStep, Step};
use crate::activity::StepError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum JournalEntry {
    /// Always the first entry
    Started { params: Value },

    ActionQueued {
        step: String,
        activity: String,
        input: Value,
    },

    /// A worker picked up a try; kept for the audit trail
    ActionAttempted {
        step: String,
        attempt: u32,
        worker: String,
    },

    ActionSucceeded { step: String, output: Value },

    ActionFailed {
        step: String,
        error: StepError,
        /// Another try is queued
        retrying: bool,
    },

    SleepStarted {
        step: String,
        wake_at: DateTime<Utc>,
    },

    SleepElapsed { step: String },

    Finished { output: Value },

    Aborted { error: StepError },
}

impl JournalEntry {
    /// The step this entry is about
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::ActionQueued { step, .. }
            | Self::ActionAttempted { step, .. }
            | Self::ActionSucceeded { step, .. }
            | Self::ActionFailed { step, .. }
            | Self::SleepStarted { step, .. }
            | Self::SleepElapsed { step } => Some(step.as_str()),
            Self::Started { .. } | Self::Finished { .. } | Self::Aborted { .. } => None,
        }
    }

    pub fn ends_run(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Aborted { .. })
    }
}

/// What the run does after a step boundary
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Run(ActionStep),
    Sleep(SleepStep),
    Finish(Value),
    Abort(StepError),
}

/// Where a run stands in its step list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    cursor: usize,
    results: Map<String, Value>,
    failure: Option<StepError>,
}

impl Progress {
    pub fn replay<'a>(steps: &[Step], journal: impl IntoIterator<Item = &'a JournalEntry>) -> Self {
        let mut progress = Self::default();
        for entry in journal {
            progress.apply(steps, entry);
        }
        progress
    }

    /// The step the run is waiting on, `None` once done or failed
    pub fn current<'s>(&self, steps: &'s [Step]) -> Option<&'s Step> {
        match self.failure {
            Some(_) => None,
            None => steps.get(self.cursor),
        }
    }

    /// Outputs so far, keyed by result key in step order
    pub fn results(&self) -> &Map<String, Value> {
        &self.results
    }

    /// Whether `entry` is news about the step the run is waiting on
    ///
    /// Entries for steps already passed, for steps not reached yet, or of the
    /// wrong kind are stale or duplicated deliveries.
    pub fn accepts(&self, steps: &[Step], entry: &JournalEntry) -> bool {
        match (self.current(steps), entry) {
            (
                Some(Step::Action(action)),
                JournalEntry::ActionAttempted { step, .. }
                | JournalEntry::ActionSucceeded { step, .. }
                | JournalEntry::ActionFailed { step, .. },
            ) => action.name == *step,
            (Some(Step::Sleep(sleep)), JournalEntry::SleepElapsed { step }) => sleep.name == *step,
            _ => false,
        }
    }

    /// Fold in one entry; true when the run crossed a step boundary
    pub fn apply(&mut self, steps: &[Step], entry: &JournalEntry) -> bool {
        if !self.accepts(steps, entry) {
            return false;
        }

        match entry {
            JournalEntry::ActionSucceeded { output, .. } => {
                if let Some(Step::Action(action)) = steps.get(self.cursor) {
                    self.results
                        .insert(action.result_key.clone(), output.clone());
                }
                self.cursor += 1;
                true
            }
            JournalEntry::SleepElapsed { .. } => {
                self.cursor += 1;
                true
            }
            JournalEntry::ActionFailed {
                error,
                retrying: false,
                ..
            } => {
                self.failure = Some(StepError {
                    retryable: false,
                    ..error.clone()
                });
                true
            }
            _ => false,
        }
    }

    pub fn next(&self, steps: &[Step]) -> Next {
        if let Some(error) = &self.failure {
            return Next::Abort(error.clone());
        }
        match steps.get(self.cursor) {
            Some(Step::Action(action)) => Next::Run(action.clone()),
            Some(Step::Sleep(sleep)) => Next::Sleep(sleep.clone()),
            None => Next::Finish(Value::Object(self.results.clone())),
        }
    }
}
