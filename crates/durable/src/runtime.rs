//! Executor, worker pool and timer service wired over one store

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::activity::Activity;
use crate::engine::{ExecutorConfig, ExecutorError, RecoveryReport, StepExecutor, WorkflowBinding};
use crate::persistence::{InMemoryJournalStore, JournalStore};
use crate::timer::{TimerService, TimerServiceConfig, TimerServiceError};
use crate::worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError};
use crate::workflow::StepWorkflow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub worker: WorkerPoolConfig,
    #[serde(default)]
    pub timers: TimerServiceConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Worker(#[from] WorkerPoolError),

    #[error(transparent)]
    Timer(#[from] TimerServiceError),
}

/// Collects workflow types; the executor is shared once built
pub struct DurableRuntimeBuilder<S: JournalStore> {
    executor: StepExecutor<S>,
    config: RuntimeConfig,
}

impl<S: JournalStore> DurableRuntimeBuilder<S> {
    pub fn workflow<D: StepWorkflow>(mut self) -> Self {
        self.executor.register::<D>();
        self
    }

    pub fn build(self) -> DurableRuntime<S> {
        let executor = Arc::new(self.executor);
        DurableRuntime {
            workers: WorkerPool::new(Arc::clone(&executor), self.config.worker),
            timers: TimerService::new(Arc::clone(&executor), self.config.timers),
            executor,
        }
    }
}

/// ```ignore
/// let runtime = DurableRuntime::in_memory(RuntimeConfig::default())
///     .workflow::<Onboarding>()
///     .build();
/// runtime.register_activity(SendEmail::new(mailer));
/// runtime.start().await?;
///
/// let handle = runtime.binding::<Onboarding>().create(Uuid::now_v7(), params).await?;
/// ```
pub struct DurableRuntime<S: JournalStore = InMemoryJournalStore> {
    executor: Arc<StepExecutor<S>>,
    workers: WorkerPool<S>,
    timers: TimerService<S>,
}

impl DurableRuntime<InMemoryJournalStore> {
    pub fn in_memory(config: RuntimeConfig) -> DurableRuntimeBuilder<InMemoryJournalStore> {
        Self::builder(Arc::new(InMemoryJournalStore::new()), config)
    }
}

impl<S: JournalStore> DurableRuntime<S> {
    pub fn builder(store: Arc<S>, config: RuntimeConfig) -> DurableRuntimeBuilder<S> {
        DurableRuntimeBuilder {
            executor: StepExecutor::new(store).with_config(config.executor.clone()),
            config,
        }
    }

    pub fn register_activity<A: Activity>(&self, activity: A) {
        self.workers.register_activity(activity);
    }

    pub fn executor(&self) -> &Arc<StepExecutor<S>> {
        &self.executor
    }

    pub fn workers(&self) -> &WorkerPool<S> {
        &self.workers
    }

    pub fn binding<D: StepWorkflow>(&self) -> WorkflowBinding<D, S> {
        WorkflowBinding::new(Arc::clone(&self.executor))
    }

    /// Recover persisted runs, then start claiming tries and firing timers
    pub async fn start(&self) -> Result<RecoveryReport, RuntimeError> {
        let report = self.executor.recover().await?;
        self.workers.start()?;
        self.timers.start()?;
        info!(worker_id = %self.workers.worker_id(), "durable runtime started");
        Ok(report)
    }

    /// Timers first, then drain the workers
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.timers.shutdown().await;
        self.workers.shutdown().await?;
        info!("durable runtime stopped");
        Ok(())
    }
}
