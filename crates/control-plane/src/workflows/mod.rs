// Workflow definitions hosted by the control plane

pub mod demo;

pub use demo::{register_activities, DemoWorkflow, WorkflowParams};
