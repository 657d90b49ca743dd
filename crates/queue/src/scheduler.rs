//! Periodic ticks: the due-item dispatcher and the janitor.

use std::sync::Arc;
use std::time::Duration;

use fanout_common::config::{DistributionConfig, WorkerConfig};
use fanout_common::{AppResult, Metrics};
use fanout_core::services::{ContentService, TaskQueue};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::workers::DistributeContext;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval of the dispatcher tick (default: 10 seconds).
    pub dispatch_interval: Duration,
    /// Due items claimed per dispatcher tick.
    pub dispatch_batch_size: u64,
    /// Interval of the janitor tick (default: 1 minute).
    pub janitor_interval: Duration,
    /// RUNNING tasks and PROCESSING contents older than this are released.
    pub stuck_task_timeout: Duration,
    /// PROCESSING queue items locked longer than this are released.
    pub item_lock_timeout: Duration,
    /// COMPLETED tasks older than this many days are purged.
    pub task_retention_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default(), &DistributionConfig::default())
    }
}

impl SchedulerConfig {
    /// Build from the worker and distribution sections.
    #[must_use]
    pub const fn from_config(worker: &WorkerConfig, distribution: &DistributionConfig) -> Self {
        Self {
            dispatch_interval: Duration::from_secs(distribution.dispatch_interval_secs),
            dispatch_batch_size: distribution.dispatch_batch_size,
            janitor_interval: Duration::from_secs(worker.janitor_interval_secs),
            stuck_task_timeout: Duration::from_secs(worker.stuck_task_timeout_secs),
            item_lock_timeout: Duration::from_secs(distribution.item_lock_timeout_secs),
            task_retention_days: distribution.task_retention_days,
        }
    }
}

/// What one janitor pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub tasks_recovered: u64,
    pub contents_released: u64,
    pub items_released: u64,
    pub tasks_purged: u64,
}

/// Work run by the periodic ticks.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    /// Claim and deliver due queue items. Returns the number claimed.
    async fn dispatch_due(&self, batch_size: u64) -> AppResult<usize>;

    /// Release stuck work and purge old tasks.
    async fn run_janitor(&self, config: &SchedulerConfig) -> AppResult<JanitorReport>;
}

/// [`JobExecutor`] over the pipeline services.
#[derive(Clone)]
pub struct PipelineExecutor {
    task_queue: TaskQueue,
    content_service: ContentService,
    distribute: DistributeContext,
    metrics: Arc<Metrics>,
}

impl PipelineExecutor {
    /// Create a new executor. Claims are made under the task queue's worker id.
    #[must_use]
    pub fn new(
        task_queue: TaskQueue,
        content_service: ContentService,
        distribute: DistributeContext,
    ) -> Self {
        let metrics = task_queue.metrics().clone();
        Self {
            task_queue,
            content_service,
            distribute,
            metrics,
        }
    }
}

#[async_trait::async_trait]
impl JobExecutor for PipelineExecutor {
    async fn dispatch_due(&self, batch_size: u64) -> AppResult<usize> {
        self.distribute
            .dispatch_due(self.task_queue.worker_id(), batch_size)
            .await
    }

    async fn run_janitor(&self, config: &SchedulerConfig) -> AppResult<JanitorReport> {
        let report = JanitorReport {
            tasks_recovered: self
                .task_queue
                .recover_stuck(config.stuck_task_timeout)
                .await?,
            contents_released: self
                .content_service
                .release_stuck(config.stuck_task_timeout)
                .await?,
            items_released: self
                .distribute
                .release_stale_locks(config.item_lock_timeout)
                .await?,
            tasks_purged: self
                .task_queue
                .purge_completed(config.task_retention_days)
                .await?,
        };

        let snapshot = self.metrics.snapshot();
        info!(
            tasks_claimed = snapshot.tasks_claimed,
            tasks_completed = snapshot.tasks_completed,
            tasks_dead_lettered = snapshot.tasks_dead_lettered,
            parses_succeeded = snapshot.parses_succeeded,
            parses_failed = snapshot.parses_failed,
            pushes_succeeded = snapshot.pushes_succeeded,
            pushes_failed = snapshot.pushes_failed,
            pushes_deduplicated = snapshot.pushes_deduplicated,
            "Pipeline counters"
        );
        Ok(report)
    }
}

/// Spawn the dispatcher and janitor ticks. Both stop when `shutdown` is
/// canceled; await the returned handles to wait for them.
pub fn run_scheduler<E: JobExecutor + 'static>(
    config: SchedulerConfig,
    executor: Arc<E>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let executor_dispatch = executor.clone();
    let executor_janitor = executor;
    let shutdown_dispatch = shutdown.clone();
    let shutdown_janitor = shutdown;
    let dispatch_interval = config.dispatch_interval;
    let batch_size = config.dispatch_batch_size;
    let janitor_interval = config.janitor_interval;

    // Spawn dispatcher task
    let dispatcher = tokio::spawn(async move {
        let mut interval = interval(dispatch_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown_dispatch.cancelled() => break,
                _ = interval.tick() => {}
            }
            match executor_dispatch.dispatch_due(batch_size).await {
                Ok(count) => {
                    if count > 0 {
                        info!(count, "Dispatched due queue items");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to dispatch due queue items");
                }
            }
        }
        debug!("Dispatcher stopped");
    });

    // Spawn janitor task
    let janitor = tokio::spawn(async move {
        let mut interval = interval(janitor_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown_janitor.cancelled() => break,
                _ = interval.tick() => {}
            }
            match executor_janitor.run_janitor(&config).await {
                Ok(report) => {
                    if report != JanitorReport::default() {
                        info!(?report, "Janitor pass finished");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Janitor pass failed");
                }
            }
        }
        debug!("Janitor stopped");
    });

    vec![dispatcher, janitor]
}
