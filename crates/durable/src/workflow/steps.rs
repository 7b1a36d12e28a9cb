//! Declarative step workflows
//!
//! A [`StepWorkflow`] turns its params into an ordered list of named steps.
//! Each step is either an action (an activity run by the worker pool, its
//! output checkpointed in the journal) or a sleep (a durable timer). The list
//! is rebuilt from the stored params on every delivery, so it must depend on
//! nothing but the params.

use std::collections::HashSet;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reliability::{duration_millis, RetryPolicy};

/// Error code of a run whose definition reuses a step name
pub const DUPLICATE_STEP: &str = "DUPLICATE_STEP";

/// Error code of a run whose sleep ends beyond the representable calendar
pub const SLEEP_OUT_OF_RANGE: &str = "SLEEP_OUT_OF_RANGE";

/// Retry and timeout settings of one action step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOptions {
    pub retry: RetryPolicy,

    /// Limit on a single try
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl StepOptions {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Runs an activity and keeps its output under `result_key`
#[derive(Debug, Clone, PartialEq)]
pub struct ActionStep {
    pub name: String,
    pub activity: String,
    pub input: Value,
    pub result_key: String,
    pub options: StepOptions,
}

impl ActionStep {
    /// The output is kept under the step name unless told otherwise
    pub fn new(name: impl Into<String>, activity: impl Into<String>, input: Value) -> Self {
        let name = name.into();
        Self {
            result_key: name.clone(),
            name,
            activity: activity.into(),
            input,
            options: StepOptions::default(),
        }
    }

    pub fn with_result_key(mut self, key: impl Into<String>) -> Self {
        self.result_key = key.into();
        self
    }

    pub fn with_options(mut self, options: StepOptions) -> Self {
        self.options = options;
        self
    }
}

/// Pauses the run; survives restarts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepStep {
    pub name: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Action(ActionStep),
    Sleep(SleepStep),
}

impl Step {
    pub fn sleep(name: impl Into<String>, duration: Duration) -> Self {
        Self::Sleep(SleepStep {
            name: name.into(),
            duration,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Action(action) => &action.name,
            Self::Sleep(sleep) => &sleep.name,
        }
    }
}

impl From<ActionStep> for Step {
    fn from(action: ActionStep) -> Self {
        Self::Action(action)
    }
}

/// A workflow written as a fixed list of steps
///
/// ```ignore
/// struct Greeting;
///
/// impl StepWorkflow for Greeting {
///     const TYPE: &'static str = "greeting";
///     type Params = GreetingParams;
///
///     fn steps(params: &GreetingParams) -> Vec<Step> {
///         vec![
///             ActionStep::new("hello", "say", json!({ "to": params.name })).into(),
///             Step::sleep("pause", Duration::from_secs(5)),
///             ActionStep::new("bye", "say", json!({ "to": params.name })).into(),
///         ]
///     }
/// }
/// ```
pub trait StepWorkflow: Send + Sync + 'static {
    /// Stored with every instance; picks the definition on replay
    const TYPE: &'static str;

    type Params: Serialize + DeserializeOwned + Send + Sync;

    fn steps(params: &Self::Params) -> Vec<Step>;
}

/// First step name that appears twice
pub(crate) fn duplicate_name(steps: &[Step]) -> Option<&str> {
    let mut seen = HashSet::new();
    steps
        .iter()
        .map(Step::name)
        .find(|name| !seen.insert(*name))
}
