//! Queue item administration.

use std::collections::BTreeMap;

use chrono::Utc;
use fanout_common::{AppError, AppResult};
use fanout_db::entities::content_queue_item::{self, QueueItemStatus};
use fanout_db::repositories::{ContentQueueItemRepository, QueueItemFilter};
use sea_orm::{IntoActiveModel, Set};
use serde::Serialize;
use tracing::info;

use crate::services::distribution::{DistributionService, mark_canceled};
use crate::services::event_publisher::{EventPublisherService, notify_items};
use crate::services::jobs::{Job, PRIORITY_MANUAL};
use crate::services::task_queue::{TaskQueue, TaskStats};

/// Statuses an operator may retry.
const RETRYABLE: [QueueItemStatus; 2] = [QueueItemStatus::Failed, QueueItemStatus::Scheduled];

fn not_retryable(id: &str, status: QueueItemStatus) -> AppError {
    AppError::Conflict(format!(
        "queue item {id} is {status:?} and cannot be retried"
    ))
}

/// Per-status counts of both queues.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub tasks: TaskStats,
    pub queue_items: BTreeMap<String, u64>,
}

/// Operator actions on queue items.
#[derive(Clone)]
pub struct QueueItemService {
    queue_repo: ContentQueueItemRepository,
    distribution: DistributionService,
    task_queue: TaskQueue,
    event_publisher: Option<EventPublisherService>,
}

impl QueueItemService {
    /// Create a new queue item service.
    #[must_use]
    pub fn new(distribution: DistributionService, task_queue: TaskQueue) -> Self {
        Self {
            queue_repo: distribution.queue_repo().clone(),
            distribution,
            task_queue,
            event_publisher: None,
        }
    }

    /// Set the event publisher.
    pub fn set_event_publisher(&mut self, publisher: EventPublisherService) {
        self.event_publisher = Some(publisher);
    }

    /// List queue items.
    pub async fn list(&self, filter: &QueueItemFilter) -> AppResult<Vec<content_queue_item::Model>> {
        self.queue_repo.list(filter).await
    }

    /// Get a queue item by ID.
    pub async fn get(&self, id: &str) -> AppResult<content_queue_item::Model> {
        self.queue_repo.get_by_id(id).await
    }

    /// Put an item back in its destination queue, due now.
    ///
    /// The item is pinned so compaction keeps it at the front. Only FAILED
    /// and SCHEDULED items qualify: pending items still await review, and
    /// skipped or canceled ones were taken out by routing decisions that
    /// `DistributionService::enqueue_content` re-evaluates.
    pub async fn retry(
        &self,
        id: &str,
        reset_attempts: bool,
    ) -> AppResult<content_queue_item::Model> {
        let item = self.queue_repo.get_by_id(id).await?;
        if !RETRYABLE.contains(&item.status) {
            return Err(not_retryable(id, item.status));
        }

        let now = Utc::now();
        let bot_chat_id = item.bot_chat_id.clone();
        let mut am = item.into_active_model();
        am.status = Set(QueueItemStatus::Scheduled);
        am.scheduled_at = Set(Some(now.into()));
        am.is_manual_schedule = Set(true);
        am.next_attempt_at = Set(None);
        am.locked_at = Set(None);
        am.locked_by = Set(None);
        if reset_attempts {
            am.attempt_count = Set(0);
        }
        am.updated_at = Set(Some(now.into()));
        let Some(updated) = self.queue_repo.update_from(am, &RETRYABLE).await? else {
            let current = self.queue_repo.get_by_id(id).await?;
            return Err(not_retryable(id, current.status));
        };

        info!(queue_item_id = %id, reset_attempts, "Queue item retried");
        notify_items(self.event_publisher.as_ref(), std::slice::from_ref(&updated)).await;

        self.distribution
            .compact_destinations(&[bot_chat_id])
            .await?;
        self.queue_repo.get_by_id(id).await
    }

    /// Cancel an active or failed item.
    pub async fn cancel(&self, id: &str) -> AppResult<content_queue_item::Model> {
        let item = self.queue_repo.get_by_id(id).await?;
        if !item.status.is_active() && item.status != QueueItemStatus::Failed {
            return Err(AppError::Conflict(format!(
                "queue item {id} is {:?} and cannot be canceled",
                item.status
            )));
        }

        let bot_chat_id = item.bot_chat_id.clone();
        let conn = self.queue_repo.connection();
        let updated = mark_canceled(conn, item, "canceled by operator", Utc::now()).await?;

        info!(queue_item_id = %id, "Queue item canceled");
        notify_items(self.event_publisher.as_ref(), std::slice::from_ref(&updated)).await;

        self.distribution
            .compact_destinations(&[bot_chat_id])
            .await?;
        Ok(updated)
    }

    /// Retry up to `limit` FAILED items matching `filter`, resetting their
    /// attempts. Returns the number retried.
    pub async fn batch_retry(&self, filter: &QueueItemFilter, limit: u64) -> AppResult<u64> {
        let failed = self.queue_repo.find_failed(filter, limit).await?;
        let mut retried = 0;
        for item in failed {
            self.retry(&item.id, true).await?;
            retried += 1;
        }
        info!(retried, "Batch retry finished");
        Ok(retried)
    }

    /// Deliver an item now through the task queue. Returns the task id.
    ///
    /// Only SCHEDULED items can be pushed; with `force` FAILED and SUCCESS
    /// items are pushed too, bypassing the delivery check.
    pub async fn push_now(&self, id: &str, force: bool) -> AppResult<String> {
        let item = self.queue_repo.get_by_id(id).await?;
        if item.status == QueueItemStatus::Processing {
            return Err(AppError::Conflict(format!("queue item {id} is being delivered")));
        }
        if !force && item.status != QueueItemStatus::Scheduled {
            return Err(AppError::Conflict(format!(
                "queue item {id} is {:?}, use force to push it",
                item.status
            )));
        }

        let task_id = self
            .task_queue
            .enqueue(
                &Job::Distribute {
                    queue_item_id: id.to_string(),
                    force,
                },
                PRIORITY_MANUAL,
            )
            .await?;
        info!(queue_item_id = %id, task_id = %task_id, force, "Push enqueued");
        Ok(task_id)
    }

    /// Per-status counts for tasks and queue items.
    pub async fn stats(&self) -> AppResult<QueueStats> {
        let tasks = self.task_queue.stats().await?;
        let queue_items = self
            .queue_repo
            .count_by_status()
            .await?
            .into_iter()
            .map(|(status, count)| (status.as_str().to_string(), count))
            .collect();
        Ok(QueueStats { tasks, queue_items })
    }
}
