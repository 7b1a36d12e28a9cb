//! Step workflows and the journal they are replayed from

mod journal;
mod steps;

pub use journal::{JournalEntry, Next, Progress};
pub use steps::{
    ActionStep, SleepStep, Step, StepOptions, StepWorkflow, DUPLICATE_STEP, SLEEP_OUT_OF_RANGE,
};

pub(crate) use steps::duplicate_name;
