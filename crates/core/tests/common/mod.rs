//! Shared setup for the core integration suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fanout_common::Metrics;
use fanout_common::config::{DistributionConfig, WorkerConfig};
use fanout_core::{ContentService, DistributionService, QueueItemService, TaskQueue};
use fanout_db::entities::content_queue_item;
use fanout_db::repositories::{ContentQueueItemRepository, ContentRepository, TaskRepository};
use fanout_db::test_utils::TestDatabase;

/// Services wired over one in-memory database.
pub struct Pipeline {
    pub db: TestDatabase,
    pub task_queue: TaskQueue,
    pub distribution: DistributionService,
    pub content: ContentService,
    pub queue_items: QueueItemService,
}

impl Pipeline {
    pub async fn new() -> Self {
        let db = TestDatabase::in_memory().await.unwrap();
        let conn = db.connection();

        let task_queue = TaskQueue::new(
            TaskRepository::new(conn.clone()),
            "worker-test".to_string(),
            Duration::from_millis(5),
            Arc::new(Metrics::new()),
        );
        let distribution = DistributionService::new(conn.clone(), &DistributionConfig::default());
        let content = ContentService::new(
            ContentRepository::new(conn),
            distribution.clone(),
            task_queue.clone(),
            &WorkerConfig::default(),
        );
        let queue_items = QueueItemService::new(distribution.clone(), task_queue.clone());

        Self {
            db,
            task_queue,
            distribution,
            content,
            queue_items,
        }
    }

    /// All queue items of a content.
    pub async fn items_of(&self, content_id: &str) -> Vec<content_queue_item::Model> {
        ContentQueueItemRepository::find_by_content(self.db.conn.as_ref(), content_id)
            .await
            .unwrap()
    }

    /// The only queue item of a content.
    pub async fn single_item(&self, content_id: &str) -> content_queue_item::Model {
        let mut items = self.items_of(content_id).await;
        assert_eq!(items.len(), 1, "expected one queue item, got {items:?}");
        items.remove(0)
    }
}
