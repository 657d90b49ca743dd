//! Durable task queue.
//!
//! A persisted queue of [`Job`] payloads. Claiming is a compare-and-swap on
//! the task row (`PENDING` to `RUNNING`), so any number of workers can poll
//! the same table without a lock manager. Dead letters stay in the table
//! with a reason so operators can inspect them in place.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fanout_common::{AppResult, IdGenerator, Metrics};
use fanout_db::entities::task::{self, DeadLetterReason, TaskStatus};
use fanout_db::repositories::TaskRepository;
use sea_orm::Set;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::services::jobs::Job;

/// A task claimed by this worker.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task: task::Model,
    pub job: Job,
}

/// Task counts per status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Durable task queue handle. One per worker; clones share the worker id.
#[derive(Clone)]
pub struct TaskQueue {
    task_repo: TaskRepository,
    worker_id: String,
    poll_interval: Duration,
    metrics: Arc<Metrics>,
    id_gen: IdGenerator,
}

impl TaskQueue {
    /// Create a queue handle for one worker.
    #[must_use]
    pub fn new(
        task_repo: TaskRepository,
        worker_id: String,
        poll_interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            task_repo,
            worker_id,
            poll_interval,
            metrics,
            id_gen: IdGenerator::new(),
        }
    }

    /// Same queue under another worker id.
    #[must_use]
    pub fn for_worker(&self, worker_id: String) -> Self {
        Self {
            worker_id,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Persist a job. Returns the task id.
    pub async fn enqueue(&self, job: &Job, priority: i32) -> AppResult<String> {
        let max_retries = match job {
            Job::Parse { max_attempts, .. } => i32::try_from(*max_attempts).unwrap_or(i32::MAX),
            Job::Distribute { .. } => 1,
        };
        let payload = serde_json::to_value(job)?;
        let id = self.id_gen.generate();

        let model = task::ActiveModel {
            id: Set(id.clone()),
            task_type: Set(job.task_type().to_string()),
            payload: Set(payload),
            status: Set(TaskStatus::Pending),
            priority: Set(priority),
            retry_count: Set(0),
            max_retries: Set(max_retries),
            last_error: Set(None),
            failure_reason: Set(None),
            worker_id: Set(None),
            started_at: Set(None),
            completed_at: Set(None),
            created_at: Set(Utc::now().into()),
            updated_at: Set(None),
        };
        self.task_repo.create(model).await?;

        debug!(task_id = %id, task_type = job.task_type(), priority, "Task enqueued");
        Ok(id)
    }

    /// Claim the next task, waiting up to `timeout` for one to appear.
    ///
    /// Picks the oldest task of the highest priority and claims it with a
    /// conditional update. A lost race retries the selection immediately;
    /// an empty queue sleeps one poll interval. Payloads that no longer
    /// decode are dead-lettered as non-retryable and skipped.
    pub async fn dequeue(&self, timeout: Duration) -> AppResult<Option<ClaimedTask>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(candidate) = self.task_repo.find_next_pending().await? {
                let now = Utc::now().into();
                if self
                    .task_repo
                    .try_claim(&candidate.id, &self.worker_id, now)
                    .await?
                {
                    self.metrics.record_task_claimed();
                    let mut task = candidate;
                    task.status = TaskStatus::Running;
                    task.worker_id = Some(self.worker_id.clone());
                    task.started_at = Some(now);

                    match serde_json::from_value::<Job>(task.payload.clone()) {
                        Ok(job) => {
                            debug!(task_id = %task.id, worker_id = %self.worker_id, "Task claimed");
                            return Ok(Some(ClaimedTask { task, job }));
                        }
                        Err(e) => {
                            error!(task_id = %task.id, error = %e, "Undecodable task payload");
                            self.push_dead_letter(
                                &task.id,
                                DeadLetterReason::NonRetryable,
                                &format!("invalid payload: {e}"),
                                task.retry_count,
                            )
                            .await?;
                        }
                    }
                }
                // Lost the race or skipped a bad payload: select again.
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Mark a task COMPLETED.
    ///
    /// Returns `false` when this worker no longer holds the task; the row
    /// is left to its current owner.
    pub async fn mark_complete(&self, task_id: &str) -> AppResult<bool> {
        let owned = self
            .task_repo
            .mark_completed(task_id, &self.worker_id, Utc::now().into())
            .await?;
        if !owned {
            self.warn_lost(task_id, "complete");
            return Ok(false);
        }
        self.metrics.record_task_finished(false);
        debug!(task_id = %task_id, "Task completed");
        Ok(true)
    }

    /// Rewrite a task into the dead-letter state.
    ///
    /// Returns `false` when this worker no longer holds the task.
    pub async fn push_dead_letter(
        &self,
        task_id: &str,
        reason: DeadLetterReason,
        error: &str,
        attempts: i32,
    ) -> AppResult<bool> {
        let owned = self
            .task_repo
            .mark_dead_letter(
                task_id,
                &self.worker_id,
                reason,
                error,
                attempts,
                Utc::now().into(),
            )
            .await?;
        if !owned {
            self.warn_lost(task_id, "dead-letter");
            return Ok(false);
        }
        self.metrics.record_task_finished(true);
        error!(
            task_id = %task_id,
            reason = reason.as_str(),
            attempts,
            error = %error,
            "Task dead-lettered"
        );
        Ok(true)
    }

    /// Record a failed attempt of a task that will run again.
    ///
    /// Returns `false` when this worker no longer holds the task.
    pub async fn record_attempt(
        &self,
        task_id: &str,
        attempts: i32,
        error: &str,
    ) -> AppResult<bool> {
        let owned = self
            .task_repo
            .record_attempt(task_id, &self.worker_id, attempts, error, Utc::now().into())
            .await?;
        if !owned {
            self.warn_lost(task_id, "record attempt");
        }
        Ok(owned)
    }

    fn warn_lost(&self, task_id: &str, action: &str) {
        warn!(
            task_id = %task_id,
            worker_id = %self.worker_id,
            action,
            "Task no longer owned by this worker, write dropped"
        );
    }

    /// Return tasks stuck in RUNNING for longer than `timeout` to PENDING.
    pub async fn recover_stuck(&self, timeout: Duration) -> AppResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(timeout).unwrap_or_default();
        let count = self.task_repo.recover_stuck(cutoff.into()).await?;
        if count > 0 {
            warn!(count, "Recovered stuck tasks");
        }
        Ok(count)
    }

    /// Delete COMPLETED tasks older than `retention_days`.
    pub async fn purge_completed(&self, retention_days: i64) -> AppResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let count = self.task_repo.purge_completed(cutoff.into()).await?;
        if count > 0 {
            info!(count, retention_days, "Purged completed tasks");
        }
        Ok(count)
    }

    /// Dead-lettered tasks, newest first.
    pub async fn dead_letters(&self, limit: u64) -> AppResult<Vec<task::Model>> {
        self.task_repo.find_dead_letters(limit).await
    }

    /// Task counts per status.
    pub async fn stats(&self) -> AppResult<TaskStats> {
        let mut stats = TaskStats {
            pending: 0,
            running: 0,
            completed: 0,
            failed: 0,
        };
        for (status, count) in self.task_repo.count_by_status().await? {
            match status {
                TaskStatus::Pending => stats.pending = count,
                TaskStatus::Running => stats.running = count,
                TaskStatus::Completed => stats.completed = count,
                TaskStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }
}
