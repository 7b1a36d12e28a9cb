//! Persistence behind the [`JournalStore`] trait, with an in-memory backend

mod memory;
mod store;

pub use memory::InMemoryJournalStore;
pub use store::{
    ClaimedTask, InstanceRecord, JournalStore, NewTask, PendingTimer, RetryDecision, RunState,
    StoreError,
};
