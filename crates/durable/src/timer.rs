//! Wakes sleeping runs
//!
//! A sleep is stored as an absolute `wake_at`, so one that came due while the
//! process was down fires on the first poll after a restart.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::{ExecutorError, StepExecutor};
use crate::persistence::{JournalStore, PendingTimer, StoreError};
use crate::reliability::duration_millis;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerServiceConfig {
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Timers fired per poll at most
    pub batch_size: usize,
}

impl Default for TimerServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
        }
    }
}

impl TimerServiceConfig {
    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval = every;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimerServiceError {
    #[error("timer service is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct TimerService<S: JournalStore> {
    executor: Arc<StepExecutor<S>>,
    config: TimerServiceConfig,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: JournalStore> TimerService<S> {
    pub fn new(executor: Arc<StepExecutor<S>>, config: TimerServiceConfig) -> Self {
        Self {
            executor,
            config,
            stop: watch::channel(false).0,
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Deliver every due timer once; returns how many were cleared
    pub async fn fire_due(&self) -> Result<usize, TimerServiceError> {
        fire_due(&self.executor, self.config.batch_size).await
    }

    pub fn start(&self) -> Result<(), TimerServiceError> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Err(TimerServiceError::AlreadyRunning);
        }

        self.stop.send_replace(false);
        let mut stop = self.stop.subscribe();
        let executor = Arc::clone(&self.executor);
        let TimerServiceConfig {
            poll_interval,
            batch_size,
        } = self.config.clone();

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = fire_due(&executor, batch_size).await {
                            error!(error = %e, "timer poll failed");
                        }
                    }
                }
            }
            debug!("timer loop stopped");
        }));
        info!(?poll_interval, batch_size, "timer service started");
        Ok(())
    }

    /// Stop polling and wait for a poll in progress
    pub async fn shutdown(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        self.stop.send_replace(true);
        if let Err(e) = task.await {
            warn!(error = %e, "timer loop panicked");
        }
    }
}

async fn fire_due<S: JournalStore>(
    executor: &StepExecutor<S>,
    batch_size: usize,
) -> Result<usize, TimerServiceError> {
    let due = executor.store().due_timers(Utc::now(), batch_size).await?;
    let mut delivered = 0;

    for timer in due {
        if deliver(executor, &timer).await {
            executor.store().clear_timer(timer.id).await?;
            delivered += 1;
        }
    }
    Ok(delivered)
}

/// True when the timer is done with: delivered, or its run no longer exists
async fn deliver<S: JournalStore>(executor: &StepExecutor<S>, timer: &PendingTimer) -> bool {
    match executor.sleep_elapsed(timer.workflow_id, &timer.step).await {
        Ok(delivery) => {
            debug!(workflow_id = %timer.workflow_id, step = %timer.step, ?delivery, "timer fired");
            true
        }
        Err(ExecutorError::Store(StoreError::UnknownInstance(_))) => {
            warn!(workflow_id = %timer.workflow_id, step = %timer.step, "timer of a missing run discarded");
            true
        }
        Err(e) => {
            // stays pending; the next poll tries again
            error!(workflow_id = %timer.workflow_id, step = %timer.step, error = %e, "timer delivery failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryJournalStore, RunState};
    use crate::workflow::{JournalEntry, Step, StepWorkflow};
    use uuid::Uuid;

    struct Nap;

    impl StepWorkflow for Nap {
        const TYPE: &'static str = "nap";
        type Params = u64;

        fn steps(millis: &u64) -> Vec<Step> {
            vec![Step::sleep("nap", Duration::from_millis(*millis))]
        }
    }

    fn setup() -> (
        Arc<StepExecutor<InMemoryJournalStore>>,
        TimerService<InMemoryJournalStore>,
    ) {
        let mut executor = StepExecutor::new(Arc::new(InMemoryJournalStore::new()));
        executor.register::<Nap>();
        let executor = Arc::new(executor);
        let config = TimerServiceConfig::default().with_poll_interval(Duration::from_millis(10));
        (Arc::clone(&executor), TimerService::new(executor, config))
    }

    async fn state(executor: &StepExecutor<InMemoryJournalStore>, id: Uuid) -> RunState {
        executor.store().instance(id).await.unwrap().state
    }

    #[tokio::test]
    async fn test_future_timer_is_left_alone() {
        let (executor, service) = setup();
        let id = Uuid::now_v7();
        executor.start::<Nap>(id, 60_000).await.unwrap();

        assert_eq!(service.fire_due().await.unwrap(), 0);
        assert_eq!(state(&executor, id).await, RunState::Waiting);
        assert_eq!(executor.store().pending_timer_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_due_timer_completes_the_run() {
        let (executor, service) = setup();
        let id = Uuid::now_v7();
        executor.start::<Nap>(id, 0).await.unwrap();

        assert_eq!(service.fire_due().await.unwrap(), 1);
        assert_eq!(state(&executor, id).await, RunState::Complete);
        assert_eq!(executor.store().pending_timer_count().await.unwrap(), 0);

        let journal = executor.store().journal(id).await.unwrap();
        assert!(journal
            .iter()
            .any(|e| matches!(e, JournalEntry::SleepElapsed { step } if step == "nap")));
    }

    #[tokio::test]
    async fn test_timer_of_missing_run_is_discarded() {
        let (executor, service) = setup();
        executor
            .store()
            .add_timer(Uuid::now_v7(), "nap", Utc::now())
            .await
            .unwrap();

        assert_eq!(service.fire_due().await.unwrap(), 1);
        assert_eq!(executor.store().pending_timer_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_loop_fires_timers() {
        let (executor, service) = setup();
        service.start().unwrap();
        assert!(service.is_running());
        assert!(matches!(service.start(), Err(TimerServiceError::AlreadyRunning)));

        let id = Uuid::now_v7();
        executor.start::<Nap>(id, 20).await.unwrap();

        let mut current = RunState::Waiting;
        for _ in 0..100 {
            current = state(&executor, id).await;
            if current.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(current, RunState::Complete);

        service.shutdown().await;
        assert!(!service.is_running());
    }
}
