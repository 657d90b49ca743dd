//! Event publisher service.
//!
//! Optional observer for live updates. Services call it after a state
//! change and only log a failed publish; nothing waits on a subscriber.
//! The Redis implementation lives in the queue crate.

use async_trait::async_trait;
use fanout_common::AppResult;
use fanout_db::entities::content::{ContentStatus, ReviewStatus};
use fanout_db::entities::content_queue_item::QueueItemStatus;
use fanout_db::entities::{content, content_queue_item};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamEvent {
    /// A content changed parse or review state.
    #[serde(rename_all = "camelCase")]
    ContentUpdated {
        id: String,
        status: ContentStatus,
        review_status: ReviewStatus,
    },
    /// A queue item changed state or time.
    #[serde(rename_all = "camelCase")]
    QueueItemChanged {
        id: String,
        content_id: String,
        bot_chat_id: String,
        status: QueueItemStatus,
        scheduled_at: Option<String>,
    },
}

impl StreamEvent {
    #[must_use]
    pub fn content_updated(content: &content::Model) -> Self {
        Self::ContentUpdated {
            id: content.id.clone(),
            status: content.status,
            review_status: content.review_status,
        }
    }

    #[must_use]
    pub fn queue_item_changed(item: &content_queue_item::Model) -> Self {
        Self::QueueItemChanged {
            id: item.id.clone(),
            content_id: item.content_id.clone(),
            bot_chat_id: item.bot_chat_id.clone(),
            status: item.status,
            scheduled_at: item.scheduled_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Trait for publishing pipeline events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a content update.
    async fn publish_content_updated(&self, content: &content::Model) -> AppResult<()>;

    /// Publish a queue item change.
    async fn publish_queue_item_changed(&self, item: &content_queue_item::Model) -> AppResult<()>;
}

/// A no-op implementation of `EventPublisher` for tests or when Redis is not configured.
#[derive(Clone, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish_content_updated(&self, _content: &content::Model) -> AppResult<()> {
        Ok(())
    }

    async fn publish_queue_item_changed(&self, _item: &content_queue_item::Model) -> AppResult<()> {
        Ok(())
    }
}

/// Wrapper for boxed `EventPublisher` trait object.
pub type EventPublisherService = Arc<dyn EventPublisher>;

/// Publish a content update, logging failures.
pub async fn notify_content(publisher: Option<&EventPublisherService>, content: &content::Model) {
    if let Some(publisher) = publisher {
        if let Err(e) = publisher.publish_content_updated(content).await {
            warn!(content_id = %content.id, error = %e, "Failed to publish content update");
        }
    }
}

/// Publish queue item changes, logging failures.
pub async fn notify_items(
    publisher: Option<&EventPublisherService>,
    items: &[content_queue_item::Model],
) {
    if let Some(publisher) = publisher {
        for item in items {
            if let Err(e) = publisher.publish_queue_item_changed(item).await {
                warn!(queue_item_id = %item.id, error = %e, "Failed to publish queue item change");
            }
        }
    }
}
