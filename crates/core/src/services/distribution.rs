//! Distribution service.
//!
//! Expands parsed content into per-destination queue items and keeps each
//! destination's schedule spaced. Every write path runs in one transaction;
//! on Postgres the queue table is locked for the duration so concurrent
//! expansions and compactions serialise instead of interleaving.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fanout_common::config::DistributionConfig;
use fanout_common::{AppError, AppResult, IdGenerator};
use fanout_db::entities::content::{ContentStatus, ReviewStatus};
use fanout_db::entities::content_queue_item::QueueItemStatus;
use fanout_db::entities::{bot_chat, content, content_queue_item, distribution_target};
use fanout_db::repositories::{
    ContentQueueItemRepository, ContentRepository, DistributionRuleRepository,
    DistributionTargetRepository, PushedRecordRepository,
};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction,
    IntoActiveModel, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::services::decision::{
    Bucket, CompiledRule, ReasonCode, decide, evaluate_rule, is_already_delivered,
};
use crate::services::event_publisher::{EventPublisherService, notify_items};
use crate::services::schedule::{
    SlotEntry, SpacingPolicy, compact, first_fit_slot, move_to_index, order_entries,
};

/// Skip reason for a destination already served by a higher-priority rule.
pub const SKIP_SUPERSEDED: &str = "superseded_by_higher_priority_rule";
/// Skip reason for a destination that already received the content.
pub const SKIP_ALREADY_DELIVERED: &str = "already_delivered";
/// Skip reason for items whose rule was disabled or deleted.
pub const SKIP_RULE_DISABLED: &str = "rule_disabled";
/// Skip reason for items whose target or chat stopped accepting posts.
pub const SKIP_TARGET_INACTIVE: &str = "target_inactive";

/// One row of a rule preview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewEntry {
    pub content_id: String,
    /// Destination the decision was made for, if the rule has any.
    pub bot_chat_id: Option<String>,
    pub bucket: Bucket,
    pub reason: ReasonCode,
    pub routed_target_id: Option<String>,
}

/// Occupied times of one destination during an expansion pass.
struct ChatSlots {
    occupied: Vec<DateTime<Utc>>,
    anchor: Option<DateTime<Utc>>,
}

impl ChatSlots {
    async fn load<C: ConnectionTrait>(conn: &C, bot_chat_id: &str) -> AppResult<Self> {
        let occupied = ContentQueueItemRepository::find_active_for_chat(conn, bot_chat_id)
            .await?
            .into_iter()
            .filter(|item| item.status == QueueItemStatus::Scheduled)
            .filter_map(|item| item.scheduled_at.map(utc))
            .collect();
        let anchor = ContentQueueItemRepository::last_delivery_at(conn, bot_chat_id)
            .await?
            .map(utc);
        Ok(Self { occupied, anchor })
    }

    fn place(&mut self, now: DateTime<Utc>, gap: Duration) -> DateTime<Utc> {
        let slot = first_fit_slot(&self.occupied, self.anchor, now, gap);
        self.occupied.push(slot);
        slot
    }
}

fn utc(time: DateTimeWithTimeZone) -> DateTime<Utc> {
    time.with_timezone(&Utc)
}

/// Distribution service: expansion, compaction and manual ordering.
#[derive(Clone)]
pub struct DistributionService {
    db: Arc<DatabaseConnection>,
    content_repo: ContentRepository,
    rule_repo: DistributionRuleRepository,
    target_repo: DistributionTargetRepository,
    queue_repo: ContentQueueItemRepository,
    pushed_repo: PushedRecordRepository,
    spacing: SpacingPolicy,
    item_max_attempts: i32,
    event_publisher: Option<EventPublisherService>,
    id_gen: IdGenerator,
}

impl DistributionService {
    /// Create a new distribution service.
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>, config: &DistributionConfig) -> Self {
        Self {
            content_repo: ContentRepository::new(db.clone()),
            rule_repo: DistributionRuleRepository::new(db.clone()),
            target_repo: DistributionTargetRepository::new(db.clone()),
            queue_repo: ContentQueueItemRepository::new(db.clone()),
            pushed_repo: PushedRecordRepository::new(db.clone()),
            db,
            spacing: SpacingPolicy::from_config(config),
            item_max_attempts: config.queue_item_max_attempts,
            event_publisher: None,
            id_gen: IdGenerator::new(),
        }
    }

    /// Set the event publisher.
    pub fn set_event_publisher(&mut self, publisher: EventPublisherService) {
        self.event_publisher = Some(publisher);
    }

    #[must_use]
    pub const fn spacing(&self) -> &SpacingPolicy {
        &self.spacing
    }

    async fn begin_locked(&self) -> AppResult<DatabaseTransaction> {
        let txn = self.db.begin().await?;
        if self.db.get_database_backend() == DatabaseBackend::Postgres {
            txn.execute_unprepared("LOCK TABLE content_queue_item IN SHARE ROW EXCLUSIVE MODE")
                .await?;
        }
        Ok(txn)
    }

    /// Enabled rules, decoded, in priority order.
    pub async fn load_rules(&self) -> AppResult<Vec<CompiledRule>> {
        self.rule_repo
            .find_enabled()
            .await?
            .into_iter()
            .map(CompiledRule::compile)
            .collect()
    }

    fn rule_gaps(&self, rules: &[CompiledRule]) -> AppResult<HashMap<String, Duration>> {
        rules
            .iter()
            .map(|r| {
                let gap = self
                    .spacing
                    .rule_interval(r.rule.rate_limit, r.rule.time_window)?;
                Ok((r.rule.id.clone(), gap))
            })
            .collect()
    }

    fn slot_entry(
        &self,
        item: &content_queue_item::Model,
        gaps: &HashMap<String, Duration>,
    ) -> Option<SlotEntry> {
        Some(SlotEntry {
            id: item.id.clone(),
            scheduled_at: utc(item.scheduled_at?),
            created_at: utc(item.created_at),
            gap: gaps
                .get(&item.rule_id)
                .copied()
                .unwrap_or(self.spacing.default_interval),
            is_manual: item.is_manual_schedule,
        })
    }

    /// Expand a content into queue items.
    ///
    /// Returns the number of items created or revived. Content that is not
    /// parsed yet or was rejected expands to nothing. With `force`, FAILED
    /// items are revived and earlier deliveries do not block new items.
    pub async fn enqueue_content(&self, content_id: &str, force: bool) -> AppResult<u64> {
        let content = self.content_repo.get_by_id(content_id).await?;
        if content.status != ContentStatus::ParseSuccess {
            debug!(content_id = %content_id, status = ?content.status, "Content not parsed, nothing to expand");
            return Ok(0);
        }
        if content.review_status == ReviewStatus::Rejected {
            debug!(content_id = %content_id, "Content rejected, nothing to expand");
            return Ok(0);
        }

        let rules = self.load_rules().await?;
        let mut rule_filtered: HashMap<String, ReasonCode> = HashMap::new();
        let mut candidates: Vec<&CompiledRule> = Vec::new();
        for rule in &rules {
            let decision = evaluate_rule(&content, rule);
            if decision.is_deliverable() {
                candidates.push(rule);
            } else {
                rule_filtered.insert(rule.rule.id.clone(), decision.reason);
            }
        }

        let candidate_ids: Vec<String> = candidates.iter().map(|r| r.rule.id.clone()).collect();
        let mut pairs_by_rule: HashMap<String, Vec<(distribution_target::Model, bot_chat::Model)>> =
            HashMap::new();
        for (target, chat) in self.target_repo.find_enabled_with_chats(&candidate_ids).await? {
            pairs_by_rule
                .entry(target.rule_id.clone())
                .or_default()
                .push((target, chat));
        }

        let delivered: HashSet<String> = self
            .pushed_repo
            .find_by_content(content_id)
            .await?
            .iter()
            .filter(|record| is_already_delivered(record, &content))
            .map(|record| record.target_id.clone())
            .collect();

        let now = Utc::now();
        let txn = self.begin_locked().await?;

        let existing = ContentQueueItemRepository::find_by_content(&txn, content_id).await?;
        let mut claimed: HashSet<String> = existing
            .iter()
            .filter(|item| {
                matches!(
                    item.status,
                    QueueItemStatus::Success | QueueItemStatus::Processing
                )
            })
            .map(|item| item.bot_chat_id.clone())
            .collect();
        let mut by_triple: HashMap<(String, String), content_queue_item::Model> = existing
            .into_iter()
            .map(|item| ((item.rule_id.clone(), item.bot_chat_id.clone()), item))
            .collect();

        let mut slots: HashMap<String, ChatSlots> = HashMap::new();
        let mut changed = Vec::new();
        let mut count = 0u64;

        for rule in &candidates {
            let Some(pairs) = pairs_by_rule.get(&rule.rule.id) else {
                continue;
            };
            let gap = self
                .spacing
                .rule_interval(rule.rule.rate_limit, rule.rule.time_window)?;

            for (_target, chat) in pairs {
                let current = by_triple.remove(&(rule.rule.id.clone(), chat.id.clone()));
                let decision = decide(&content, rule, chat);

                if !decision.is_deliverable() {
                    if let Some(item) = current.filter(|i| i.status.is_active()) {
                        changed.push(mark_skipped(&txn, item, decision.reason.as_str(), now).await?);
                    }
                    continue;
                }

                let routed = decision
                    .routed_target_id
                    .clone()
                    .unwrap_or_else(|| chat.chat_id.clone());

                let skip_reason = if claimed.contains(&chat.id) {
                    Some(SKIP_SUPERSEDED)
                } else if !force && delivered.contains(&routed) {
                    Some(SKIP_ALREADY_DELIVERED)
                } else {
                    None
                };
                claimed.insert(chat.id.clone());

                if let Some(reason) = skip_reason {
                    match current {
                        Some(item) if item.status.is_active() => {
                            changed.push(mark_skipped(&txn, item, reason, now).await?);
                        }
                        Some(_) => {}
                        None => {
                            let mut item =
                                self.new_item(&content, rule, chat, &routed, false, None, now);
                            item.status = QueueItemStatus::Skipped;
                            item.last_error = Some(format!("skipped: {reason}"));
                            item.last_error_type = Some(reason.to_string());
                            item.last_error_at = Some(now.into());
                            if ContentQueueItemRepository::insert_if_absent(
                                &txn,
                                item.clone().into_active_model().reset_all(),
                            )
                            .await?
                            {
                                changed.push(item);
                            }
                        }
                    }
                    continue;
                }

                let needs_approval = decision.bucket == Bucket::PendingReview;
                let chat_slots = match slots.entry(chat.id.clone()) {
                    std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                    std::collections::hash_map::Entry::Vacant(e) => {
                        e.insert(ChatSlots::load(&txn, &chat.id).await?)
                    }
                };

                match current {
                    None => {
                        let scheduled_at = (!needs_approval).then(|| chat_slots.place(now, gap));
                        let item = self.new_item(
                            &content,
                            rule,
                            chat,
                            &routed,
                            needs_approval,
                            scheduled_at,
                            now,
                        );
                        if ContentQueueItemRepository::insert_if_absent(
                            &txn,
                            item.clone().into_active_model().reset_all(),
                        )
                        .await?
                        {
                            debug!(
                                queue_item_id = %item.id,
                                content_id = %content_id,
                                rule = %rule.rule.name,
                                bot_chat_id = %chat.id,
                                status = ?item.status,
                                "Queue item created"
                            );
                            count += 1;
                            changed.push(item);
                        }
                    }
                    Some(item) => match item.status {
                        QueueItemStatus::Success | QueueItemStatus::Processing => {}
                        QueueItemStatus::Scheduled => {
                            if needs_approval {
                                let mut am = item.into_active_model();
                                am.status = Set(QueueItemStatus::Pending);
                                am.needs_approval = Set(true);
                                am.scheduled_at = Set(None);
                                am.updated_at = Set(Some(now.into()));
                                changed.push(ContentQueueItemRepository::update_on(&txn, am).await?);
                            } else if item.target_chat_id != routed {
                                let mut am = item.into_active_model();
                                am.target_chat_id = Set(routed.clone());
                                am.updated_at = Set(Some(now.into()));
                                changed.push(ContentQueueItemRepository::update_on(&txn, am).await?);
                            }
                        }
                        QueueItemStatus::Pending => {
                            if !needs_approval {
                                let scheduled_at = match item.scheduled_at {
                                    Some(pinned) if item.is_manual_schedule => utc(pinned),
                                    _ => chat_slots.place(now, gap),
                                };
                                let mut am = item.into_active_model();
                                am.status = Set(QueueItemStatus::Scheduled);
                                am.scheduled_at = Set(Some(scheduled_at.into()));
                                am.approved_at = Set(Some(now.into()));
                                am.target_chat_id = Set(routed.clone());
                                am.updated_at = Set(Some(now.into()));
                                count += 1;
                                changed.push(ContentQueueItemRepository::update_on(&txn, am).await?);
                            }
                        }
                        QueueItemStatus::Failed if !force => {}
                        QueueItemStatus::Failed
                        | QueueItemStatus::Skipped
                        | QueueItemStatus::Canceled => {
                            let scheduled_at =
                                (!needs_approval).then(|| chat_slots.place(now, gap));
                            let mut am = item.into_active_model();
                            am.status = Set(if needs_approval {
                                QueueItemStatus::Pending
                            } else {
                                QueueItemStatus::Scheduled
                            });
                            am.scheduled_at = Set(scheduled_at.map(Into::into));
                            am.is_manual_schedule = Set(false);
                            am.needs_approval = Set(needs_approval);
                            am.approved_at = Set(None);
                            am.target_chat_id = Set(routed.clone());
                            am.priority = Set(rule.rule.priority);
                            am.attempt_count = Set(0);
                            am.max_attempts = Set(self.item_max_attempts);
                            am.next_attempt_at = Set(None);
                            am.locked_at = Set(None);
                            am.locked_by = Set(None);
                            am.last_error = Set(None);
                            am.last_error_type = Set(None);
                            am.last_error_at = Set(None);
                            am.updated_at = Set(Some(now.into()));
                            count += 1;
                            changed.push(ContentQueueItemRepository::update_on(&txn, am).await?);
                        }
                    },
                }
            }
        }

        // Active items no longer reached by any rule and destination pair.
        for item in by_triple.into_values().filter(|i| i.status.is_active()) {
            let reason = if let Some(code) = rule_filtered.get(&item.rule_id) {
                code.as_str()
            } else if rules.iter().any(|r| r.rule.id == item.rule_id) {
                SKIP_TARGET_INACTIVE
            } else {
                SKIP_RULE_DISABLED
            };
            changed.push(mark_skipped(&txn, item, reason, now).await?);
        }

        txn.commit().await?;

        info!(
            content_id = %content_id,
            rules = candidates.len(),
            enqueued = count,
            changed = changed.len(),
            "Content expanded into queue items"
        );
        notify_items(self.event_publisher.as_ref(), &changed).await;

        Ok(count)
    }

    #[allow(clippy::fn_params_excessive_bools)]
    fn new_item(
        &self,
        content: &content::Model,
        rule: &CompiledRule,
        chat: &bot_chat::Model,
        routed: &str,
        needs_approval: bool,
        scheduled_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> content_queue_item::Model {
        content_queue_item::Model {
            id: self.id_gen.generate(),
            content_id: content.id.clone(),
            rule_id: rule.rule.id.clone(),
            bot_chat_id: chat.id.clone(),
            target_chat_id: routed.to_string(),
            status: if needs_approval {
                QueueItemStatus::Pending
            } else {
                QueueItemStatus::Scheduled
            },
            priority: rule.rule.priority,
            scheduled_at: scheduled_at.map(Into::into),
            is_manual_schedule: false,
            needs_approval,
            approved_at: None,
            attempt_count: 0,
            max_attempts: self.item_max_attempts,
            next_attempt_at: None,
            locked_at: None,
            locked_by: None,
            message_id: None,
            last_error: None,
            last_error_type: None,
            last_error_at: None,
            created_at: now.into(),
            updated_at: None,
        }
    }

    /// Re-lay one destination's SCHEDULED items inside `conn`.
    async fn compact_chat<C: ConnectionTrait>(
        &self,
        conn: &C,
        bot_chat_id: &str,
        gaps: &HashMap<String, Duration>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<content_queue_item::Model>> {
        let items = scheduled_items(conn, bot_chat_id).await?;
        let mut entries: Vec<SlotEntry> = items
            .iter()
            .filter_map(|item| self.slot_entry(item, gaps))
            .collect();
        order_entries(&mut entries);
        self.apply_layout(conn, bot_chat_id, items, &entries, now)
            .await
    }

    /// Compact `ordered` and write back the times that changed.
    async fn apply_layout<C: ConnectionTrait>(
        &self,
        conn: &C,
        bot_chat_id: &str,
        items: Vec<content_queue_item::Model>,
        ordered: &[SlotEntry],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<content_queue_item::Model>> {
        let anchor = ContentQueueItemRepository::last_delivery_at(conn, bot_chat_id)
            .await?
            .map(utc);
        let times = compact(ordered, anchor, now, self.spacing.manual_gap);

        let mut by_id: HashMap<String, content_queue_item::Model> =
            items.into_iter().map(|item| (item.id.clone(), item)).collect();
        let mut changed = Vec::new();

        for (entry, time) in ordered.iter().zip(times) {
            let Some(item) = by_id.remove(&entry.id) else {
                continue;
            };
            if item.scheduled_at.map(utc) == Some(time)
                && item.is_manual_schedule == entry.is_manual
            {
                continue;
            }
            let mut am = item.into_active_model();
            am.scheduled_at = Set(Some(time.into()));
            am.is_manual_schedule = Set(entry.is_manual);
            am.updated_at = Set(Some(now.into()));
            changed.push(ContentQueueItemRepository::update_on(conn, am).await?);
        }

        Ok(changed)
    }

    /// Compact every destination queue. Returns the number of items moved.
    pub async fn compact_schedule(&self) -> AppResult<usize> {
        let gaps = self.rule_gaps(&self.load_rules().await?)?;
        let now = Utc::now();

        let txn = self.begin_locked().await?;
        let chat_ids = ContentQueueItemRepository::find_active_chat_ids(&txn).await?;
        let mut changed = Vec::new();
        for chat_id in &chat_ids {
            changed.extend(self.compact_chat(&txn, chat_id, &gaps, now).await?);
        }
        txn.commit().await?;

        info!(destinations = chat_ids.len(), moved = changed.len(), "Schedule compacted");
        notify_items(self.event_publisher.as_ref(), &changed).await;
        Ok(changed.len())
    }

    /// Compact the given destination queues. Returns the number of items moved.
    pub async fn compact_destinations(&self, bot_chat_ids: &[String]) -> AppResult<usize> {
        if bot_chat_ids.is_empty() {
            return Ok(0);
        }
        let gaps = self.rule_gaps(&self.load_rules().await?)?;
        let now = Utc::now();

        let txn = self.begin_locked().await?;
        let mut changed = Vec::new();
        for chat_id in bot_chat_ids.iter().collect::<BTreeSet<_>>() {
            changed.extend(self.compact_chat(&txn, chat_id, &gaps, now).await?);
        }
        txn.commit().await?;

        debug!(destinations = bot_chat_ids.len(), moved = changed.len(), "Destinations compacted");
        notify_items(self.event_publisher.as_ref(), &changed).await;
        Ok(changed.len())
    }

    /// Compact the destinations a content has items in.
    pub async fn compact_for_content(&self, content_id: &str) -> AppResult<usize> {
        let chat_ids: Vec<String> =
            ContentQueueItemRepository::find_by_content(self.db.as_ref(), content_id)
                .await?
                .into_iter()
                .map(|item| item.bot_chat_id)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
        self.compact_destinations(&chat_ids).await
    }

    /// Move a content to position `new_index` in every destination queue it
    /// is scheduled in, pin it there and compact.
    pub async fn reorder_queue_item(
        &self,
        content_id: &str,
        new_index: usize,
    ) -> AppResult<Vec<content_queue_item::Model>> {
        let gaps = self.rule_gaps(&self.load_rules().await?)?;
        let now = Utc::now();

        let txn = self.begin_locked().await?;
        let own: Vec<content_queue_item::Model> =
            ContentQueueItemRepository::find_by_content(&txn, content_id)
                .await?
                .into_iter()
                .filter(|item| item.status == QueueItemStatus::Scheduled)
                .collect();
        if own.is_empty() {
            return Err(AppError::Conflict(format!(
                "content {content_id} has no scheduled queue items"
            )));
        }

        let mut changed = Vec::new();
        for item in &own {
            let items = scheduled_items(&txn, &item.bot_chat_id).await?;
            let mut entries: Vec<SlotEntry> = items
                .iter()
                .filter_map(|i| self.slot_entry(i, &gaps))
                .collect();
            order_entries(&mut entries);
            let entries = move_to_index(entries, &item.id, new_index);
            changed.extend(
                self.apply_layout(&txn, &item.bot_chat_id, items, &entries, now)
                    .await?,
            );
        }
        txn.commit().await?;

        info!(content_id = %content_id, new_index, moved = changed.len(), "Queue item reordered");
        notify_items(self.event_publisher.as_ref(), &changed).await;
        Ok(changed)
    }

    /// Pin all active items of a content at `time` and compact their
    /// destinations.
    pub async fn reschedule(
        &self,
        content_id: &str,
        time: DateTime<Utc>,
    ) -> AppResult<Vec<content_queue_item::Model>> {
        let gaps = self.rule_gaps(&self.load_rules().await?)?;
        let now = Utc::now();

        let txn = self.begin_locked().await?;
        let own: Vec<content_queue_item::Model> =
            ContentQueueItemRepository::find_by_content(&txn, content_id)
                .await?
                .into_iter()
                .filter(|item| item.status.is_active())
                .collect();
        if own.is_empty() {
            return Err(AppError::Conflict(format!(
                "content {content_id} has no active queue items"
            )));
        }

        let mut chats = BTreeSet::new();
        let mut changed = Vec::new();
        for item in own {
            chats.insert(item.bot_chat_id.clone());
            let mut am = item.into_active_model();
            am.scheduled_at = Set(Some(time.into()));
            am.is_manual_schedule = Set(true);
            am.next_attempt_at = Set(None);
            am.updated_at = Set(Some(now.into()));
            changed.push(ContentQueueItemRepository::update_on(&txn, am).await?);
        }
        for chat_id in &chats {
            changed.extend(self.compact_chat(&txn, chat_id, &gaps, now).await?);
        }
        txn.commit().await?;

        info!(content_id = %content_id, time = %time, "Content rescheduled");
        notify_items(self.event_publisher.as_ref(), &changed).await;
        Ok(changed)
    }

    /// Cancel every active item of a content and compact their destinations.
    ///
    /// Returns the number of canceled items.
    pub async fn cancel_for_content(&self, content_id: &str, reason: &str) -> AppResult<u64> {
        let gaps = self.rule_gaps(&self.load_rules().await?)?;
        let now = Utc::now();

        let txn = self.begin_locked().await?;
        let active: Vec<content_queue_item::Model> =
            ContentQueueItemRepository::find_by_content(&txn, content_id)
                .await?
                .into_iter()
                .filter(|item| item.status.is_active())
                .collect();

        let mut chats = BTreeSet::new();
        let mut changed = Vec::new();
        for item in active {
            chats.insert(item.bot_chat_id.clone());
            changed.push(mark_canceled(&txn, item, reason, now).await?);
        }
        let canceled = changed.len() as u64;
        for chat_id in &chats {
            changed.extend(self.compact_chat(&txn, chat_id, &gaps, now).await?);
        }
        txn.commit().await?;

        if canceled > 0 {
            info!(content_id = %content_id, canceled, reason = %reason, "Queue items canceled");
        }
        notify_items(self.event_publisher.as_ref(), &changed).await;
        Ok(canceled)
    }

    /// Apply a rule to recent parsed content without persisting anything.
    pub async fn preview_rule(&self, rule_id: &str, limit: u64) -> AppResult<Vec<PreviewEntry>> {
        let rule = CompiledRule::compile(self.rule_repo.get_by_id(rule_id).await?)?;
        let chats: Vec<bot_chat::Model> = self
            .target_repo
            .find_enabled_with_chats(&[rule.rule.id.clone()])
            .await?
            .into_iter()
            .map(|(_, chat)| chat)
            .collect();

        let mut entries = Vec::new();
        for content in self.content_repo.find_recent_parsed(limit).await? {
            if chats.is_empty() {
                let decision = evaluate_rule(&content, &rule);
                entries.push(PreviewEntry {
                    content_id: content.id.clone(),
                    bot_chat_id: None,
                    bucket: decision.bucket,
                    reason: decision.reason,
                    routed_target_id: None,
                });
                continue;
            }
            for chat in &chats {
                let decision = decide(&content, &rule, chat);
                entries.push(PreviewEntry {
                    content_id: content.id.clone(),
                    bot_chat_id: Some(chat.id.clone()),
                    bucket: decision.bucket,
                    reason: decision.reason,
                    routed_target_id: decision.routed_target_id,
                });
            }
        }
        Ok(entries)
    }

    /// Queue item repository shared with the queue-item service.
    #[must_use]
    pub const fn queue_repo(&self) -> &ContentQueueItemRepository {
        &self.queue_repo
    }
}

async fn scheduled_items<C: ConnectionTrait>(
    conn: &C,
    bot_chat_id: &str,
) -> AppResult<Vec<content_queue_item::Model>> {
    Ok(
        ContentQueueItemRepository::find_active_for_chat(conn, bot_chat_id)
            .await?
            .into_iter()
            .filter(|item| item.status == QueueItemStatus::Scheduled && item.scheduled_at.is_some())
            .collect(),
    )
}

async fn mark_skipped<C: ConnectionTrait>(
    conn: &C,
    item: content_queue_item::Model,
    reason: &str,
    now: DateTime<Utc>,
) -> AppResult<content_queue_item::Model> {
    debug!(queue_item_id = %item.id, reason = %reason, "Queue item skipped");
    let mut am = item.into_active_model();
    am.status = Set(QueueItemStatus::Skipped);
    am.locked_at = Set(None);
    am.locked_by = Set(None);
    am.last_error = Set(Some(format!("skipped: {reason}")));
    am.last_error_type = Set(Some(reason.to_string()));
    am.last_error_at = Set(Some(now.into()));
    am.updated_at = Set(Some(now.into()));
    ContentQueueItemRepository::update_on(conn, am).await
}

/// Mark an item CANCELED with `reason`.
pub async fn mark_canceled<C: ConnectionTrait>(
    conn: &C,
    item: content_queue_item::Model,
    reason: &str,
    now: DateTime<Utc>,
) -> AppResult<content_queue_item::Model> {
    let mut am = item.into_active_model();
    am.status = Set(QueueItemStatus::Canceled);
    am.locked_at = Set(None);
    am.locked_by = Set(None);
    am.next_attempt_at = Set(None);
    am.last_error = Set(Some(reason.to_string()));
    am.last_error_type = Set(Some("canceled".to_string()));
    am.last_error_at = Set(Some(now.into()));
    am.updated_at = Set(Some(now.into()));
    ContentQueueItemRepository::update_on(conn, am).await
}
