//! Retry schedules for action steps

mod retry;

pub(crate) use retry::duration_millis;
pub use retry::RetryPolicy;
