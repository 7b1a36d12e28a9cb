use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::activity::{Activity, ActivityContext, StepError};
use crate::engine::StepExecutor;
use crate::persistence::{ClaimedTask, JournalStore, RetryDecision};
use crate::reliability::duration_millis;

/// Error code of a try that ran past its step timeout
pub const TIMEOUT: &str = "TIMEOUT";

/// Error code of a try whose output could not be journaled
pub const DELIVERY: &str = "DELIVERY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Recorded with every try this pool makes
    pub worker_id: String,

    /// Tries running at once
    pub concurrency: usize,

    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// How often abandoned claims are looked for
    #[serde(with = "duration_millis")]
    pub reclaim_interval: Duration,

    /// A claim unreported for this long counts as abandoned
    #[serde(with = "duration_millis")]
    pub claim_timeout: Duration,

    /// How long shutdown waits for running tries
    #[serde(with = "duration_millis")]
    pub drain_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            concurrency: 10,
            poll_interval: Duration::from_millis(250),
            reclaim_interval: Duration::from_secs(30),
            claim_timeout: Duration::from_secs(600),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// At least one
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval = every;
        self
    }

    pub fn with_reclaim(mut self, every: Duration, claim_timeout: Duration) -> Self {
        self.reclaim_interval = every;
        self.claim_timeout = claim_timeout;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    Running,
    /// Shutting down; no new claims
    Draining,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("no activities registered")]
    NoActivities,

    #[error("{0} tries still running when the drain timeout passed")]
    DrainTimeout(usize),
}

pub type ActivityResult = Result<Value, StepError>;

/// An activity with its types erased to JSON
pub type ActivityHandler =
    Arc<dyn Fn(ActivityContext, Value) -> BoxFuture<'static, ActivityResult> + Send + Sync>;

/// Claims action tries and runs them
///
/// Register activities before [`start`](Self::start); the poll loop works from
/// a snapshot taken then.
pub struct WorkerPool<S: JournalStore> {
    executor: Arc<StepExecutor<S>>,
    config: WorkerPoolConfig,
    handlers: RwLock<HashMap<String, ActivityHandler>>,
    slots: Arc<Semaphore>,
    state: RwLock<WorkerPoolStatus>,
    stop: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: JournalStore> WorkerPool<S> {
    pub fn new(executor: Arc<StepExecutor<S>>, config: WorkerPoolConfig) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(config.concurrency)),
            executor,
            config,
            handlers: RwLock::new(HashMap::new()),
            state: RwLock::new(WorkerPoolStatus::Stopped),
            stop: watch::channel(false).0,
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Register a typed activity under its `NAME`
    pub fn register_activity<A: Activity>(&self, activity: A) {
        let activity = Arc::new(activity);
        self.register_handler(A::NAME, move |ctx, input| {
            let activity = Arc::clone(&activity);
            async move {
                let input: A::Input = serde_json::from_value(input)?;
                let output = activity.run(&ctx, input).await?;
                Ok::<_, StepError>(serde_json::to_value(output)?)
            }
        });
    }

    /// Register a handler working on raw JSON
    pub fn register_handler<F, Fut>(&self, activity: &str, handler: F)
    where
        F: Fn(ActivityContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActivityResult> + Send + 'static,
    {
        let handler: ActivityHandler = Arc::new(move |ctx, input| Box::pin(handler(ctx, input)));
        self.handlers.write().insert(activity.to_string(), handler);
        debug!(%activity, "activity registered");
    }

    /// Registered activity names, sorted
    pub fn activities(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let mut state = self.state.write();
            if *state != WorkerPoolStatus::Stopped {
                return Err(WorkerPoolError::AlreadyRunning);
            }
            if self.handlers.read().is_empty() {
                return Err(WorkerPoolError::NoActivities);
            }
            *state = WorkerPoolStatus::Running;
        }
        self.stop.send_replace(false);

        let poller = Poller {
            executor: Arc::clone(&self.executor),
            handlers: self.handlers.read().clone(),
            activities: self.activities(),
            slots: Arc::clone(&self.slots),
            worker_id: self.config.worker_id.clone(),
        };
        info!(
            activities = ?poller.activities,
            concurrency = self.config.concurrency,
            "worker pool started"
        );

        let poll = tokio::spawn(poller.run(self.config.poll_interval, self.stop.subscribe()));
        let reclaim = tokio::spawn(reclaim_loop(
            Arc::clone(&self.executor),
            self.config.reclaim_interval,
            self.config.claim_timeout,
            self.stop.subscribe(),
        ));
        self.loops.lock().extend([poll, reclaim]);
        Ok(())
    }

    /// Stop claiming, then wait up to the drain timeout for running tries
    ///
    /// Tries still running afterwards keep their claims; the next pool's
    /// reclaim loop puts them back once the claim timeout passes.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        {
            let mut state = self.state.write();
            if *state != WorkerPoolStatus::Running {
                return Ok(());
            }
            *state = WorkerPoolStatus::Draining;
        }
        self.stop.send_replace(true);

        let loops: Vec<_> = self.loops.lock().drain(..).collect();
        for handle in loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker loop panicked");
            }
        }

        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while self.running_tasks() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;

        *self.state.write() = WorkerPoolStatus::Stopped;
        match drained {
            Ok(()) => {
                info!("worker pool stopped");
                Ok(())
            }
            Err(_) => {
                let running = self.running_tasks();
                warn!(running, "drain timeout passed");
                Err(WorkerPoolError::DrainTimeout(running))
            }
        }
    }

    pub fn status(&self) -> WorkerPoolStatus {
        *self.state.read()
    }

    pub fn running_tasks(&self) -> usize {
        self.config.concurrency - self.slots.available_permits()
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }
}

/// State the poll loop owns
struct Poller<S: JournalStore> {
    executor: Arc<StepExecutor<S>>,
    handlers: HashMap<String, ActivityHandler>,
    activities: Vec<String>,
    slots: Arc<Semaphore>,
    worker_id: String,
}

impl<S: JournalStore> Poller<S> {
    async fn run(self, every: Duration, mut stop: watch::Receiver<bool>) {
        while !*stop.borrow() {
            self.poll_once().await;
            tokio::select! {
                _ = tokio::time::sleep(every) => {}
                _ = stop.changed() => {}
            }
        }
        debug!("poll loop stopped");
    }

    async fn poll_once(&self) {
        let free = self.slots.available_permits();
        if free == 0 {
            return;
        }

        let tasks = match self.executor.store().claim_tasks(&self.activities, free).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "claiming tasks failed");
                return;
            }
        };

        for task in tasks {
            let Some(handler) = self.handlers.get(&task.activity) else {
                warn!(activity = %task.activity, "claimed a task with no handler");
                continue;
            };
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                warn!(task_id = %task.id, "no free slot for claimed task");
                break;
            };
            tokio::spawn(run_task(
                Arc::clone(&self.executor),
                Arc::clone(handler),
                task,
                self.worker_id.clone(),
                permit,
            ));
        }
    }
}

async fn reclaim_loop<S: JournalStore>(
    executor: Arc<StepExecutor<S>>,
    every: Duration,
    claim_timeout: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                match executor.store().release_stale_tasks(claim_timeout).await {
                    Ok(0) => {}
                    Ok(released) => info!(released, "abandoned claims put back"),
                    Err(e) => error!(error = %e, "releasing stale claims failed"),
                }
            }
        }
    }
    debug!("reclaim loop stopped");
}

/// One try of one action step, reported back to the executor
#[instrument(
    skip_all,
    fields(workflow_id = %task.workflow_id, step = %task.step, attempt = task.attempt)
)]
async fn run_task<S: JournalStore>(
    executor: Arc<StepExecutor<S>>,
    handler: ActivityHandler,
    task: ClaimedTask,
    worker_id: String,
    _permit: OwnedSemaphorePermit,
) {
    if let Err(e) = executor
        .step_attempted(task.workflow_id, &task.step, task.attempt, &worker_id)
        .await
    {
        warn!(error = %e, "could not journal the attempt");
    }

    let ctx = ActivityContext::for_task(&task, &worker_id);
    let limit = task.options.timeout;
    let outcome = tokio::time::timeout(limit, handler(ctx, task.input.clone()))
        .await
        .unwrap_or_else(|_| {
            Err(StepError::transient(format!("try exceeded {limit:?}")).with_code(TIMEOUT))
        });

    let error = match outcome {
        Ok(output) => match executor.step_succeeded(task.workflow_id, &task.step, output).await {
            Ok(_) => {
                if let Err(e) = executor.store().finish_task(task.id).await {
                    error!(task_id = %task.id, error = %e, "could not mark task finished");
                }
                debug!("try succeeded");
                return;
            }
            Err(e) => {
                error!(error = %e, "could not journal the output");
                StepError::transient(format!("output not journaled: {e}")).with_code(DELIVERY)
            }
        },
        Err(error) => error,
    };

    let retrying = match executor.store().fail_task(task.id, &error).await {
        Ok(RetryDecision::Retry { attempt, after }) => {
            warn!(error = %error, next_attempt = attempt, ?after, "try failed, retrying");
            true
        }
        Ok(RetryDecision::GiveUp) => {
            warn!(error = %error, "try failed, giving up");
            false
        }
        Err(e) => {
            error!(task_id = %task.id, error = %e, "could not record the failed try");
            return;
        }
    };

    if let Err(e) = executor
        .step_failed(task.workflow_id, &task.step, error, retrying)
        .await
    {
        error!(error = %e, "could not journal the failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryJournalStore, RunState};
    use crate::reliability::RetryPolicy;
    use crate::workflow::{ActionStep, Step, StepOptions, StepWorkflow};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Echo;

    impl StepWorkflow for Echo {
        const TYPE: &'static str = "echo";
        type Params = Value;

        fn steps(params: &Value) -> Vec<Step> {
            let options = StepOptions::default()
                .with_retry(RetryPolicy::fixed(Duration::from_millis(10), 3))
                .with_timeout(Duration::from_millis(200));
            vec![ActionStep::new("echo", "echo", params.clone())
                .with_options(options)
                .into()]
        }
    }

    fn setup() -> (
        Arc<StepExecutor<InMemoryJournalStore>>,
        WorkerPool<InMemoryJournalStore>,
    ) {
        let mut executor = StepExecutor::new(Arc::new(InMemoryJournalStore::new()));
        executor.register::<Echo>();
        let executor = Arc::new(executor);
        let config = WorkerPoolConfig::default()
            .with_worker_id("test-worker")
            .with_poll_interval(Duration::from_millis(10));
        (Arc::clone(&executor), WorkerPool::new(executor, config))
    }

    async fn settle(executor: &StepExecutor<InMemoryJournalStore>, id: Uuid) -> RunState {
        for _ in 0..200 {
            let state = executor.store().instance(id).await.unwrap().state;
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("instance {id} never finished");
    }

    #[test]
    fn test_config_defaults_and_builders() {
        let config = WorkerPoolConfig::default();
        assert!(config.worker_id.starts_with("worker-"));
        assert_eq!(config.concurrency, 10);

        let config = config
            .with_concurrency(0)
            .with_drain_timeout(Duration::from_secs(1))
            .with_reclaim(Duration::from_secs(5), Duration::from_secs(50));
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.drain_timeout, Duration::from_secs(1));
        assert_eq!(config.claim_timeout, Duration::from_secs(50));
    }

    #[tokio::test]
    async fn test_start_requires_activities() {
        let (_, pool) = setup();
        assert!(matches!(pool.start(), Err(WorkerPoolError::NoActivities)));
        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (_, pool) = setup();
        pool.register_handler("echo", |_, input| async move { Ok(input) });

        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(WorkerPoolError::AlreadyRunning)));

        pool.shutdown().await.unwrap();
        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
    }

    #[tokio::test]
    async fn test_output_advances_the_run() {
        let (executor, pool) = setup();
        pool.register_handler("echo", |ctx, input| async move {
            Ok(json!({ "input": input, "attempt": ctx.attempt, "by": ctx.worker_id }))
        });
        pool.start().unwrap();

        let id = Uuid::now_v7();
        executor.start::<Echo>(id, json!("hi")).await.unwrap();

        assert_eq!(settle(&executor, id).await, RunState::Complete);
        assert_eq!(
            executor.store().instance(id).await.unwrap().output,
            Some(json!({ "echo": { "input": "hi", "attempt": 1, "by": "test-worker" } }))
        );
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let (executor, pool) = setup();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        pool.register_handler("echo", move |_, _| {
            let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    Err(StepError::transient("cold start"))
                } else {
                    Ok(json!("warm"))
                }
            }
        });
        pool.start().unwrap();

        let id = Uuid::now_v7();
        executor.start::<Echo>(id, json!(null)).await.unwrap();

        assert_eq!(settle(&executor, id).await, RunState::Complete);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_the_step() {
        let (executor, pool) = setup();
        pool.register_handler("echo", |_, _| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!(null))
        });
        pool.start().unwrap();

        let id = Uuid::now_v7();
        executor.start::<Echo>(id, json!(null)).await.unwrap();

        assert_eq!(settle(&executor, id).await, RunState::Errored);
        let error = executor.store().instance(id).await.unwrap().error.unwrap();
        assert_eq!(error.code.as_deref(), Some(TIMEOUT));
        assert!(!error.retryable);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_typed_activity_rejects_bad_input() {
        struct Double;

        #[async_trait::async_trait]
        impl Activity for Double {
            const NAME: &'static str = "echo";
            type Input = u64;
            type Output = u64;

            async fn run(&self, _ctx: &ActivityContext, n: u64) -> Result<u64, StepError> {
                Ok(n * 2)
            }
        }

        let (executor, pool) = setup();
        pool.register_activity(Double);
        pool.start().unwrap();

        let ok = Uuid::now_v7();
        executor.start::<Echo>(ok, json!(21)).await.unwrap();
        let bad = Uuid::now_v7();
        executor.start::<Echo>(bad, json!("twenty")).await.unwrap();

        assert_eq!(settle(&executor, ok).await, RunState::Complete);
        assert_eq!(
            executor.store().instance(ok).await.unwrap().output,
            Some(json!({ "echo": 42 }))
        );

        assert_eq!(settle(&executor, bad).await, RunState::Errored);
        let error = executor.store().instance(bad).await.unwrap().error.unwrap();
        assert_eq!(error.code.as_deref(), Some(crate::activity::BAD_PAYLOAD));
        pool.shutdown().await.unwrap();
    }
}
