//! # Waypoint durable engine
//!
//! Runs step workflows in-process and keeps them going across restarts of
//! the runtime. A workflow is an ordered list of named steps, each an
//! action (an activity run by the worker pool) or a sleep (a stored wake-up
//! time). Everything that happens to a run goes into its journal, and the
//! run's position is replayed from that journal on every delivery.
//!
//! ```text
//!   WorkflowBinding ──start──▶ StepExecutor ◀──sleep_elapsed── TimerService
//!                                │     ▲
//!                        journal │     │ step_succeeded / step_failed
//!                                ▼     │
//!                          JournalStore ◀──claim── WorkerPool
//! ```
//!
//! ```ignore
//! use waypoint_durable::prelude::*;
//!
//! struct Onboarding;
//!
//! impl StepWorkflow for Onboarding {
//!     const TYPE: &'static str = "onboarding";
//!     type Params = OnboardingParams;
//!
//!     fn steps(params: &OnboardingParams) -> Vec<Step> {
//!         vec![
//!             ActionStep::new("welcome", "send_email", json!({ "to": params.email })).into(),
//!             Step::sleep("grace", Duration::from_secs(3600)),
//!             ActionStep::new("follow_up", "send_email", json!({ "to": params.email })).into(),
//!         ]
//!     }
//! }
//!
//! let runtime = DurableRuntime::in_memory(RuntimeConfig::default())
//!     .workflow::<Onboarding>()
//!     .build();
//! runtime.register_activity(SendEmail::new(mailer));
//! runtime.start().await?;
//! ```

pub mod activity;
pub mod engine;
pub mod persistence;
pub mod reliability;
pub mod runtime;
pub mod timer;
pub mod worker;
pub mod workflow;

pub mod prelude {
    pub use crate::activity::{Activity, ActivityContext, StepError};
    pub use crate::engine::{
        BindingError, InstanceStatus, StepExecutor, WorkflowBinding, WorkflowInstanceHandle,
    };
    pub use crate::persistence::{InMemoryJournalStore, JournalStore, RunState};
    pub use crate::reliability::RetryPolicy;
    pub use crate::runtime::{DurableRuntime, RuntimeConfig};
    pub use crate::timer::TimerServiceConfig;
    pub use crate::worker::WorkerPoolConfig;
    pub use crate::workflow::{ActionStep, JournalEntry, Step, StepOptions, StepWorkflow};

    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::json;
    pub use std::time::Duration;
    pub use uuid::Uuid;
}

pub use activity::{Activity, ActivityContext, StepError};
pub use engine::{
    BindingError, Delivery, ExecutorConfig, ExecutorError, InstanceStatus, RecoveryReport,
    StepExecutor, WorkflowBinding, WorkflowInstanceHandle,
};
pub use persistence::{InMemoryJournalStore, JournalStore, RunState, StoreError};
pub use reliability::RetryPolicy;
pub use runtime::{DurableRuntime, DurableRuntimeBuilder, RuntimeConfig, RuntimeError};
pub use timer::{TimerService, TimerServiceConfig, TimerServiceError};
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
pub use workflow::{
    ActionStep, JournalEntry, Next, Progress, SleepStep, Step, StepOptions, StepWorkflow,
    DUPLICATE_STEP, SLEEP_OUT_OF_RANGE,
};
