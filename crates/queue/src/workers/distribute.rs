//! Distribute worker and due-item dispatcher.
//!
//! Delivery is idempotent per `(content, destination)`: before calling the
//! renderer the pushed record for the routed chat is checked, and a success
//! writes that record and skips any sibling item heading to the same chat.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use fanout_common::{AppResult, IdGenerator, Metrics};
use fanout_core::services::decision::is_already_delivered;
use fanout_core::services::event_publisher::notify_items;
use fanout_core::services::{CollaboratorError, EventPublisherService, PushRendererService, PushTarget};
use fanout_db::entities::content_queue_item::{self, QueueItemStatus};
use fanout_db::entities::pushed_record::{self, PushStatus};
use fanout_db::entities::{content, distribution_target};
use fanout_db::repositories::{
    BotChatRepository, ContentQueueItemRepository, ContentRepository,
    DistributionTargetRepository, PushedRecordRepository,
};
use sea_orm::{DatabaseConnection, IntoActiveModel, Set};
use tracing::{debug, error, info, warn};

use crate::retry::RetryConfig;
use crate::workers::TaskOutcome;

/// Statuses a forced push may claim from.
const FORCE_CLAIMABLE: [QueueItemStatus; 3] = [
    QueueItemStatus::Scheduled,
    QueueItemStatus::Failed,
    QueueItemStatus::Success,
];

const ALREADY_DELIVERED: &str = "already_delivered";

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Pushed; carries the delivery id.
    Delivered(String),
    /// An earlier push already covers the destination.
    Deduplicated,
    /// Failed, another attempt is scheduled.
    Retrying,
    /// Failed for good.
    Failed,
    /// The item's lock was released or taken over before the result was
    /// written; the current holder owns the item.
    LockLost,
}

enum DispatchGroup {
    Single(content_queue_item::Model),
    Batch(distribution_target::Model, Vec<content_queue_item::Model>),
}

/// Context for the distribute worker and the dispatcher tick.
#[derive(Clone)]
pub struct DistributeContext {
    queue_repo: ContentQueueItemRepository,
    content_repo: ContentRepository,
    target_repo: DistributionTargetRepository,
    bot_chat_repo: BotChatRepository,
    pushed_repo: PushedRecordRepository,
    renderer: PushRendererService,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
    event_publisher: Option<EventPublisherService>,
    id_gen: IdGenerator,
}

impl DistributeContext {
    /// Create a new distribute context.
    #[must_use]
    pub fn new(
        db: Arc<DatabaseConnection>,
        renderer: PushRendererService,
        retry: RetryConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            queue_repo: ContentQueueItemRepository::new(db.clone()),
            content_repo: ContentRepository::new(db.clone()),
            target_repo: DistributionTargetRepository::new(db.clone()),
            bot_chat_repo: BotChatRepository::new(db.clone()),
            pushed_repo: PushedRecordRepository::new(db),
            renderer,
            retry,
            metrics,
            event_publisher: None,
            id_gen: IdGenerator::new(),
        }
    }

    /// Set the event publisher.
    pub fn set_event_publisher(&mut self, publisher: EventPublisherService) {
        self.event_publisher = Some(publisher);
    }

    async fn notify(&self, items: &[content_queue_item::Model]) {
        notify_items(self.event_publisher.as_ref(), items).await;
    }

    /// Write a settled item under the lock the claim took.
    async fn settle(
        &self,
        item_id: &str,
        owner: &str,
        am: content_queue_item::ActiveModel,
    ) -> AppResult<Option<content_queue_item::Model>> {
        let updated = self.queue_repo.update_locked(am, owner).await?;
        if updated.is_none() {
            warn!(
                queue_item_id = %item_id,
                worker_id = %owner,
                "Queue item lock lost, result not written"
            );
        }
        Ok(updated)
    }

    /// Claim an item for delivery.
    ///
    /// Without `force` only SCHEDULED items are claimable; a forced push may
    /// also take FAILED and SUCCESS items. Returns `None` when the item is
    /// in any other state or another worker won the race.
    pub async fn claim(
        &self,
        item_id: &str,
        worker_id: &str,
        force: bool,
    ) -> AppResult<Option<content_queue_item::Model>> {
        let from: &[QueueItemStatus] = if force {
            &FORCE_CLAIMABLE
        } else {
            &[QueueItemStatus::Scheduled]
        };
        if !self
            .queue_repo
            .try_claim(item_id, worker_id, from, Utc::now().into())
            .await?
        {
            return Ok(None);
        }

        let item = self.queue_repo.get_by_id(item_id).await?;
        debug!(queue_item_id = %item_id, worker_id = %worker_id, "Queue item claimed");
        self.notify(std::slice::from_ref(&item)).await;
        Ok(Some(item))
    }

    /// Deliver one claimed item.
    pub async fn deliver(
        &self,
        item: content_queue_item::Model,
        force: bool,
    ) -> AppResult<DeliveryOutcome> {
        let content = self.content_repo.get_by_id(&item.content_id).await?;
        if !force && self.deduplicate(&item, &content).await? {
            return Ok(DeliveryOutcome::Deduplicated);
        }

        let chat = self.bot_chat_repo.get_by_id(&item.bot_chat_id).await?;
        let target = self
            .target_repo
            .find_by_rule_and_chat(&item.rule_id, &item.bot_chat_id)
            .await?;
        let push_target = PushTarget {
            platform: chat.platform.clone(),
            chat_id: item.target_chat_id.clone(),
            render_config: target.and_then(|t| t.render_config),
        };

        match self.renderer.push(&content, &push_target).await {
            Ok(message_id) => {
                self.record_success(item, &chat.platform, &message_id)
                    .await?;
                Ok(DeliveryOutcome::Delivered(message_id))
            }
            Err(failure) => self.record_failure(item, &failure).await,
        }
    }

    /// Deliver several claimed items of one merge-forward target as a single
    /// message.
    pub async fn deliver_batch(
        &self,
        items: Vec<content_queue_item::Model>,
        target: &distribution_target::Model,
    ) -> AppResult<Vec<DeliveryOutcome>> {
        let mut outcomes = Vec::new();
        let mut pending = Vec::new();
        let mut contents = Vec::new();
        for item in items {
            let content = self.content_repo.get_by_id(&item.content_id).await?;
            if self.deduplicate(&item, &content).await? {
                outcomes.push(DeliveryOutcome::Deduplicated);
                continue;
            }
            pending.push(item);
            contents.push(content);
        }

        if pending.len() <= 1 {
            for item in pending {
                outcomes.push(self.deliver(item, false).await?);
            }
            return Ok(outcomes);
        }

        let chat = self.bot_chat_repo.get_by_id(&target.bot_chat_id).await?;
        let push_target = PushTarget {
            platform: chat.platform.clone(),
            chat_id: pending[0].target_chat_id.clone(),
            render_config: target.render_config.clone(),
        };

        info!(
            bot_chat_id = %target.bot_chat_id,
            count = pending.len(),
            "Pushing merged batch"
        );
        match self.renderer.push_batch(&contents, &push_target).await {
            Ok(message_id) => {
                for item in pending {
                    self.record_success(item, &chat.platform, &message_id)
                        .await?;
                    outcomes.push(DeliveryOutcome::Delivered(message_id.clone()));
                }
            }
            Err(failure) => {
                for item in pending {
                    outcomes.push(self.record_failure(item, &failure).await?);
                }
            }
        }
        Ok(outcomes)
    }

    /// Skip the item when the content already reached its routed chat.
    async fn deduplicate(
        &self,
        item: &content_queue_item::Model,
        content: &content::Model,
    ) -> AppResult<bool> {
        let Some(record) = self
            .pushed_repo
            .find(&item.content_id, &item.target_chat_id)
            .await?
        else {
            return Ok(false);
        };
        if !is_already_delivered(&record, content) {
            return Ok(false);
        }

        let now = Utc::now();
        let owner = lock_owner(item).to_string();
        let mut am = item.clone().into_active_model();
        am.status = Set(QueueItemStatus::Skipped);
        am.message_id = Set(record.message_id);
        am.locked_at = Set(None);
        am.locked_by = Set(None);
        am.last_error = Set(Some(format!("skipped: {ALREADY_DELIVERED}")));
        am.last_error_type = Set(Some(ALREADY_DELIVERED.to_string()));
        am.last_error_at = Set(Some(now.into()));
        am.updated_at = Set(Some(now.into()));
        let Some(updated) = self.settle(&item.id, &owner, am).await? else {
            return Ok(true);
        };

        self.metrics.record_push_deduplicated();
        info!(
            queue_item_id = %item.id,
            content_id = %item.content_id,
            target_chat_id = %item.target_chat_id,
            "Already delivered, skipping push"
        );
        self.notify(std::slice::from_ref(&updated)).await;
        Ok(true)
    }

    async fn record_success(
        &self,
        item: content_queue_item::Model,
        platform: &str,
        message_id: &str,
    ) -> AppResult<()> {
        let now = Utc::now();
        self.pushed_repo
            .upsert(pushed_record::ActiveModel {
                id: Set(self.id_gen.generate()),
                content_id: Set(item.content_id.clone()),
                target_id: Set(item.target_chat_id.clone()),
                platform: Set(platform.to_string()),
                rule_id: Set(Some(item.rule_id.clone())),
                queue_item_id: Set(Some(item.id.clone())),
                message_id: Set(Some(message_id.to_string())),
                push_status: Set(PushStatus::Success),
                pushed_at: Set(now.into()),
            })
            .await?;

        let item_id = item.id.clone();
        let owner = lock_owner(&item).to_string();
        let attempts = item.attempt_count + 1;
        let mut am = item.into_active_model();
        am.status = Set(QueueItemStatus::Success);
        am.message_id = Set(Some(message_id.to_string()));
        am.attempt_count = Set(attempts);
        am.next_attempt_at = Set(None);
        am.locked_at = Set(None);
        am.locked_by = Set(None);
        am.last_error = Set(None);
        am.last_error_type = Set(None);
        am.updated_at = Set(Some(now.into()));
        self.metrics.record_push(true);
        let Some(delivered) = self.settle(&item_id, &owner, am).await? else {
            return Ok(());
        };

        let mut changed = vec![];
        for sibling in self
            .queue_repo
            .find_active_siblings(&delivered.content_id, &delivered.bot_chat_id, &delivered.id)
            .await?
        {
            let mut am = sibling.into_active_model();
            am.status = Set(QueueItemStatus::Skipped);
            am.last_error = Set(Some(format!("skipped: {ALREADY_DELIVERED}")));
            am.last_error_type = Set(Some(ALREADY_DELIVERED.to_string()));
            am.last_error_at = Set(Some(now.into()));
            am.updated_at = Set(Some(now.into()));
            changed.push(self.queue_repo.update(am).await?);
        }

        info!(
            queue_item_id = %delivered.id,
            content_id = %delivered.content_id,
            target_chat_id = %delivered.target_chat_id,
            message_id = %message_id,
            siblings_skipped = changed.len(),
            "Content delivered"
        );
        changed.insert(0, delivered);
        self.notify(&changed).await;
        Ok(())
    }

    async fn record_failure(
        &self,
        item: content_queue_item::Model,
        failure: &CollaboratorError,
    ) -> AppResult<DeliveryOutcome> {
        let now = Utc::now();
        let attempts = item.attempt_count + 1;
        let retry = failure.is_retryable() && attempts < item.max_attempts;
        let item_id = item.id.clone();
        let owner = lock_owner(&item).to_string();
        let max_attempts = item.max_attempts;

        let mut am = item.into_active_model();
        am.attempt_count = Set(attempts);
        am.locked_at = Set(None);
        am.locked_by = Set(None);
        am.last_error = Set(Some(failure.to_string()));
        am.last_error_type = Set(Some(failure.kind().to_string()));
        am.last_error_at = Set(Some(now.into()));
        am.updated_at = Set(Some(now.into()));

        let outcome = if retry {
            let delay = self
                .retry
                .delay_for_attempt(u32::try_from(attempts - 1).unwrap_or(0));
            let next_attempt = now + chrono::Duration::from_std(delay).unwrap_or_default();
            am.status = Set(QueueItemStatus::Scheduled);
            am.next_attempt_at = Set(Some(next_attempt.into()));
            warn!(
                queue_item_id = %item_id,
                attempt = attempts,
                max_attempts,
                next_attempt = %next_attempt,
                error = %failure,
                "Push failed, retrying"
            );
            DeliveryOutcome::Retrying
        } else {
            am.status = Set(QueueItemStatus::Failed);
            am.next_attempt_at = Set(None);
            error!(
                queue_item_id = %item_id,
                attempt = attempts,
                kind = failure.kind(),
                error = %failure,
                "Push failed"
            );
            DeliveryOutcome::Failed
        };

        self.metrics.record_push(false);
        let Some(updated) = self.settle(&item_id, &owner, am).await? else {
            return Ok(DeliveryOutcome::LockLost);
        };
        self.notify(std::slice::from_ref(&updated)).await;
        Ok(outcome)
    }

    /// Claim up to `batch_size` due items in schedule order and deliver them.
    ///
    /// Items of merge-forward targets heading to the same chat are pushed
    /// as one batch. Returns the number of items claimed.
    pub async fn dispatch_due(&self, worker_id: &str, batch_size: u64) -> AppResult<usize> {
        let due = self.queue_repo.find_due(Utc::now().into(), batch_size).await?;
        if due.is_empty() {
            return Ok(0);
        }

        let mut groups: Vec<DispatchGroup> = Vec::new();
        let mut batch_index: HashMap<(String, String), usize> = HashMap::new();
        let mut claimed = 0;

        for candidate in due {
            let Some(item) = self.claim(&candidate.id, worker_id, false).await? else {
                continue;
            };
            claimed += 1;

            let target = self
                .target_repo
                .find_by_rule_and_chat(&item.rule_id, &item.bot_chat_id)
                .await?;
            match target {
                Some(target) if target.merge_forward => {
                    let key = (item.bot_chat_id.clone(), item.target_chat_id.clone());
                    if let Some(&index) = batch_index.get(&key) {
                        if let Some(DispatchGroup::Batch(_, items)) = groups.get_mut(index) {
                            items.push(item);
                        }
                    } else {
                        batch_index.insert(key, groups.len());
                        groups.push(DispatchGroup::Batch(target, vec![item]));
                    }
                }
                _ => groups.push(DispatchGroup::Single(item)),
            }
        }

        for group in groups {
            let result = match group {
                DispatchGroup::Single(item) => self.deliver(item, false).await.map(|_| ()),
                DispatchGroup::Batch(target, items) => {
                    self.deliver_batch(items, &target).await.map(|_| ())
                }
            };
            // The lock stays until the janitor releases it.
            if let Err(e) = result {
                error!(error = %e, "Dispatch failed");
            }
        }

        debug!(claimed, "Dispatched due queue items");
        Ok(claimed)
    }

    /// Return PROCESSING items locked before `cutoff` to SCHEDULED.
    pub async fn release_stale_locks(&self, timeout: std::time::Duration) -> AppResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(timeout).unwrap_or_default();
        let count = self.queue_repo.release_stale_locks(cutoff.into()).await?;
        if count > 0 {
            warn!(count, "Released stale queue item locks");
        }
        Ok(count)
    }
}

fn lock_owner(item: &content_queue_item::Model) -> &str {
    item.locked_by.as_deref().unwrap_or_default()
}

/// Worker function for `distribute` tasks.
///
/// Item failures are recorded on the item, which has its own attempt
/// budget, so the task itself completes.
pub async fn distribute_worker(
    queue_item_id: &str,
    force: bool,
    worker_id: &str,
    ctx: &DistributeContext,
) -> AppResult<TaskOutcome> {
    let Some(item) = ctx.claim(queue_item_id, worker_id, force).await? else {
        debug!(queue_item_id = %queue_item_id, force, "Queue item not claimable, nothing to push");
        return Ok(TaskOutcome::Completed);
    };

    let outcome = ctx.deliver(item, force).await?;
    debug!(queue_item_id = %queue_item_id, ?outcome, "Distribute task finished");
    Ok(TaskOutcome::Completed)
}
