//! The executor that drives runs, and the typed bindings callers use

mod binding;
mod executor;

pub use binding::{BindingError, InstanceStatus, WorkflowBinding, WorkflowInstanceHandle};
pub use executor::{Delivery, ExecutorConfig, ExecutorError, RecoveryReport, StepExecutor};
