//! Worker pool running action tries
//!
//! ```text
//!   poll loop ──claim──▶ JournalStore task queue
//!       │
//!       ▼ (one semaphore slot per try)
//!   run_task ──step_succeeded / step_failed──▶ StepExecutor
//!
//!   reclaim loop ──release_stale_tasks──▶ JournalStore
//! ```

mod pool;

pub use pool::{
    ActivityHandler, ActivityResult, WorkerPool, WorkerPoolConfig, WorkerPoolError,
    WorkerPoolStatus, DELIVERY, TIMEOUT,
};
