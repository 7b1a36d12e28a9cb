//! Activities: the code behind action steps
//!
//! An activity runs on the worker pool with JSON in and JSON out. It may run
//! more than once for the same step when a try fails or a worker disappears,
//! but only the first successful output for a step lands in the journal.

mod context;
mod error;

pub use context::ActivityContext;
pub use error::{StepError, BAD_PAYLOAD};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Typed body of an action step
///
/// ```ignore
/// struct Greet;
///
/// #[async_trait]
/// impl Activity for Greet {
///     const NAME: &'static str = "greet";
///     type Input = GreetInput;
///     type Output = String;
///
///     async fn run(&self, _ctx: &ActivityContext, input: GreetInput) -> Result<String, StepError> {
///         Ok(format!("hello {}", input.name))
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Name action steps use to address this activity
    const NAME: &'static str;

    type Input: DeserializeOwned + Send;
    type Output: Serialize + Send;

    async fn run(&self, ctx: &ActivityContext, input: Self::Input)
        -> Result<Self::Output, StepError>;
}
