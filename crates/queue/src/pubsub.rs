//! Redis Pub/Sub observer.
//!
//! Publishes pipeline events as JSON so dashboards on other instances can
//! follow the queue live. Nothing in the pipeline waits on a subscriber.

use async_trait::async_trait;
use fanout_common::{AppError, AppResult};
use fanout_core::services::{EventPublisher, StreamEvent};
use fanout_db::entities::{content, content_queue_item};
use fred::clients::Client;
use fred::error::{Error as RedisError, ErrorKind as RedisErrorKind};
use fred::interfaces::{ClientLike, PubsubInterface};
use fred::types::config::Config as RedisConfig;
use tracing::{debug, info};

/// Channel suffixes, appended to the configured prefix.
pub mod channels {
    /// Content updates.
    pub const CONTENT: &str = "content";
    /// Queue item changes.
    pub const QUEUE: &str = "queue";
}

/// Full channel name for `suffix` under `prefix`.
#[must_use]
pub fn channel_name(prefix: &str, suffix: &str) -> String {
    format!("{prefix}:{suffix}")
}

/// Event publisher backed by Redis Pub/Sub.
#[derive(Clone)]
pub struct RedisPubSub {
    publisher: Client,
    prefix: String,
}

impl RedisPubSub {
    /// Connect to Redis.
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self, RedisError> {
        let config = RedisConfig::from_url(redis_url)?;
        let publisher = Client::new(config, None, None, None);
        publisher.init().await?;

        info!(prefix, "Redis Pub/Sub initialized");

        Ok(Self {
            publisher,
            prefix: prefix.to_string(),
        })
    }

    /// Publish an event to a channel suffix.
    pub async fn publish(&self, suffix: &str, event: &StreamEvent) -> Result<(), RedisError> {
        let payload = serde_json::to_string(event).map_err(|e| {
            RedisError::new(
                RedisErrorKind::InvalidArgument,
                format!("Serialization error: {e}"),
            )
        })?;
        let channel = channel_name(&self.prefix, suffix);
        let _: () = self.publisher.publish(channel.as_str(), payload).await?;
        debug!(channel = %channel, ?event, "Published Pub/Sub event");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RedisPubSub {
    async fn publish_content_updated(&self, content: &content::Model) -> AppResult<()> {
        self.publish(channels::CONTENT, &StreamEvent::content_updated(content))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))
    }

    async fn publish_queue_item_changed(&self, item: &content_queue_item::Model) -> AppResult<()> {
        self.publish(channels::QUEUE, &StreamEvent::queue_item_changed(item))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        assert_eq!(channel_name("fanout", channels::CONTENT), "fanout:content");
        assert_eq!(channel_name("staging", channels::QUEUE), "staging:queue");
    }
}
