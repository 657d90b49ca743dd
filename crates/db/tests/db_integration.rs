//! Database integration tests.
//!
//! Most tests run against a migrated in-memory SQLite database. The ones
//! marked `#[ignore]` need a running `PostgreSQL` instance.
//! Run with: `cargo test -p fanout-db --test db_integration -- --include-ignored`
//!
//! Environment variables:
//!   `TEST_DB_HOST` (default: localhost)
//!   `TEST_DB_PORT` (default: 5433)
//!   `TEST_DB_USER` (default: `fanout_test`)
//!   `TEST_DB_PASSWORD` (default: `fanout_test`)
//!   `TEST_DB_NAME` (default: `fanout_test`)

#![allow(clippy::unwrap_used)]

use chrono::{Duration, Utc};
use fanout_db::entities::content::ReviewStatus;
use fanout_db::entities::content_queue_item::{self, QueueItemStatus};
use fanout_db::entities::pushed_record::{self, PushStatus};
use fanout_db::entities::task::{self, TaskStatus};
use fanout_db::repositories::{
    ContentQueueItemRepository, ContentRepository, PushedRecordRepository, TaskRepository,
};
use fanout_db::test_utils::fixtures::{
    RuleFixture, insert_bot_chat, insert_parsed_content, insert_rule, insert_target,
};
use fanout_db::test_utils::{TestDatabase, TestDbConfig};
use sea_orm::{ActiveModelTrait, ConnectionTrait, IntoActiveModel, Set};
use serde_json::json;

/// A scheduled item for a freshly seeded content, rule and chat.
async fn seeded_item(db: &TestDatabase, id: &str) -> content_queue_item::Model {
    let conn = db.conn.as_ref();
    let rule = insert_rule(conn, RuleFixture::new(&format!("rule-{id}"), 0))
        .await
        .unwrap();
    let chat = insert_bot_chat(conn, &format!("chat-{id}"), None).await.unwrap();
    insert_target(conn, &rule.id, &chat.id, false).await.unwrap();
    let content = insert_parsed_content(conn, &[], false, ReviewStatus::Approved)
        .await
        .unwrap();

    content_queue_item::Model {
        id: id.to_string(),
        content_id: content.id,
        rule_id: rule.id,
        bot_chat_id: chat.id,
        target_chat_id: chat.chat_id,
        status: QueueItemStatus::Scheduled,
        priority: 0,
        scheduled_at: Some(Utc::now().into()),
        is_manual_schedule: false,
        needs_approval: false,
        approved_at: None,
        attempt_count: 0,
        max_attempts: 3,
        next_attempt_at: None,
        locked_at: None,
        locked_by: None,
        message_id: None,
        last_error: None,
        last_error_type: None,
        last_error_at: None,
        created_at: Utc::now().into(),
        updated_at: None,
    }
}

fn task_row(id: &str, priority: i32, age_secs: i64) -> task::ActiveModel {
    task::ActiveModel {
        id: Set(id.to_string()),
        task_type: Set("parse".to_string()),
        payload: Set(json!({"action": "parse", "content_id": id, "max_attempts": 3})),
        status: Set(TaskStatus::Pending),
        priority: Set(priority),
        retry_count: Set(0),
        max_retries: Set(3),
        last_error: Set(None),
        failure_reason: Set(None),
        worker_id: Set(None),
        started_at: Set(None),
        completed_at: Set(None),
        created_at: Set((Utc::now() - Duration::seconds(age_secs)).into()),
        updated_at: Set(None),
    }
}

#[tokio::test]
async fn test_queue_item_triple_is_unique() {
    let db = TestDatabase::in_memory().await.unwrap();
    let item = seeded_item(&db, "q1").await;

    let inserted = ContentQueueItemRepository::insert_if_absent(
        db.conn.as_ref(),
        item.clone().into_active_model().reset_all(),
    )
    .await
    .unwrap();
    assert!(inserted);

    let mut duplicate = item.clone();
    duplicate.id = "q2".to_string();
    let inserted = ContentQueueItemRepository::insert_if_absent(
        db.conn.as_ref(),
        duplicate.into_active_model().reset_all(),
    )
    .await
    .unwrap();
    assert!(!inserted);

    let items = ContentQueueItemRepository::find_by_content(db.conn.as_ref(), &item.content_id)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "q1");
}

#[tokio::test]
async fn test_queue_item_claim_is_exclusive() {
    let db = TestDatabase::in_memory().await.unwrap();
    let item = seeded_item(&db, "q1").await;
    ContentQueueItemRepository::insert_if_absent(
        db.conn.as_ref(),
        item.into_active_model().reset_all(),
    )
    .await
    .unwrap();

    let repo = ContentQueueItemRepository::new(db.connection());
    let now = Utc::now().into();
    let from = [QueueItemStatus::Scheduled];
    assert!(repo.try_claim("q1", "worker-a", &from, now).await.unwrap());
    assert!(!repo.try_claim("q1", "worker-b", &from, now).await.unwrap());

    let claimed = repo.get_by_id("q1").await.unwrap();
    assert_eq!(claimed.status, QueueItemStatus::Processing);
    assert_eq!(claimed.locked_by.as_deref(), Some("worker-a"));
    assert!(repo.find_due(Utc::now().into(), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_locks_return_to_schedule() {
    let db = TestDatabase::in_memory().await.unwrap();
    let item = seeded_item(&db, "q1").await;
    ContentQueueItemRepository::insert_if_absent(
        db.conn.as_ref(),
        item.into_active_model().reset_all(),
    )
    .await
    .unwrap();

    let repo = ContentQueueItemRepository::new(db.connection());
    let locked_at = Utc::now() - Duration::minutes(30);
    repo.try_claim("q1", "dead-worker", &[QueueItemStatus::Scheduled], locked_at.into())
        .await
        .unwrap();

    // Recent locks survive.
    let cutoff = Utc::now() - Duration::hours(1);
    assert_eq!(repo.release_stale_locks(cutoff.into()).await.unwrap(), 0);

    let cutoff = Utc::now() - Duration::minutes(10);
    assert_eq!(repo.release_stale_locks(cutoff.into()).await.unwrap(), 1);

    let released = repo.get_by_id("q1").await.unwrap();
    assert_eq!(released.status, QueueItemStatus::Scheduled);
    assert!(released.locked_at.is_none());
    assert!(released.locked_by.is_none());
}

#[tokio::test]
async fn test_find_due_skips_backoff_and_future_items() {
    let db = TestDatabase::in_memory().await.unwrap();
    let now = Utc::now();

    let mut due = seeded_item(&db, "due").await;
    due.scheduled_at = Some((now - Duration::minutes(5)).into());
    let mut later = seeded_item(&db, "later").await;
    later.scheduled_at = Some((now + Duration::minutes(5)).into());
    let mut backing_off = seeded_item(&db, "backoff").await;
    backing_off.scheduled_at = Some((now - Duration::minutes(10)).into());
    backing_off.next_attempt_at = Some((now + Duration::minutes(1)).into());

    for item in [due, later, backing_off] {
        ContentQueueItemRepository::insert_if_absent(
            db.conn.as_ref(),
            item.into_active_model().reset_all(),
        )
        .await
        .unwrap();
    }

    let repo = ContentQueueItemRepository::new(db.connection());
    let found = repo.find_due(now.into(), 10).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "due");
}

#[tokio::test]
async fn test_pushed_record_upsert_refreshes_pair() {
    let db = TestDatabase::in_memory().await.unwrap();
    let content = insert_parsed_content(db.conn.as_ref(), &[], false, ReviewStatus::Approved)
        .await
        .unwrap();
    let repo = PushedRecordRepository::new(db.connection());

    let record = |id: &str, message_id: &str, status: PushStatus| pushed_record::ActiveModel {
        id: Set(id.to_string()),
        content_id: Set(content.id.clone()),
        target_id: Set("@main".to_string()),
        platform: Set("telegram".to_string()),
        rule_id: Set(None),
        queue_item_id: Set(None),
        message_id: Set(Some(message_id.to_string())),
        push_status: Set(status),
        pushed_at: Set(Utc::now().into()),
    };

    repo.upsert(record("p1", "m1", PushStatus::Failed)).await.unwrap();
    repo.upsert(record("p2", "m2", PushStatus::Success)).await.unwrap();

    let records = repo.find_by_content(&content.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "p1");
    assert_eq!(records[0].message_id.as_deref(), Some("m2"));
    assert_eq!(records[0].push_status, PushStatus::Success);

    assert!(repo.find(&content.id, "@other").await.unwrap().is_none());
}

#[tokio::test]
async fn test_task_claim_order_and_exclusivity() {
    let db = TestDatabase::in_memory().await.unwrap();
    let repo = TaskRepository::new(db.connection());

    repo.create(task_row("old", 0, 60)).await.unwrap();
    repo.create(task_row("new", 0, 0)).await.unwrap();
    repo.create(task_row("urgent", 10, 0)).await.unwrap();

    let next = repo.find_next_pending().await.unwrap().unwrap();
    assert_eq!(next.id, "urgent");

    let now = Utc::now().into();
    assert!(repo.try_claim("urgent", "worker-a", now).await.unwrap());
    assert!(!repo.try_claim("urgent", "worker-b", now).await.unwrap());

    let next = repo.find_next_pending().await.unwrap().unwrap();
    assert_eq!(next.id, "old");

    let claimed = repo.get_by_id("urgent").await.unwrap();
    assert_eq!(claimed.status, TaskStatus::Running);
    assert_eq!(claimed.worker_id.as_deref(), Some("worker-a"));
}

#[tokio::test]
async fn test_task_recovery_and_purge_cutoffs() {
    let db = TestDatabase::in_memory().await.unwrap();
    let repo = TaskRepository::new(db.connection());
    repo.create(task_row("stuck", 0, 0)).await.unwrap();
    repo.create(task_row("done", 0, 0)).await.unwrap();

    let long_ago = Utc::now() - Duration::hours(2);
    repo.try_claim("stuck", "dead-worker", long_ago.into())
        .await
        .unwrap();
    repo.try_claim("done", "worker-a", long_ago.into())
        .await
        .unwrap();
    assert!(repo.mark_completed("done", "worker-a", long_ago.into()).await.unwrap());

    let cutoff = Utc::now() - Duration::hours(1);
    assert_eq!(repo.recover_stuck(cutoff.into()).await.unwrap(), 1);
    assert_eq!(repo.purge_completed(cutoff.into()).await.unwrap(), 1);

    let recovered = repo.get_by_id("stuck").await.unwrap();
    assert_eq!(recovered.status, TaskStatus::Pending);
    assert!(recovered.worker_id.is_none());
    assert!(repo.find_by_id("done").await.unwrap().is_none());
}

#[tokio::test]
async fn test_task_settle_requires_current_owner() {
    let db = TestDatabase::in_memory().await.unwrap();
    let repo = TaskRepository::new(db.connection());
    repo.create(task_row("t1", 0, 0)).await.unwrap();

    let now = Utc::now().into();
    assert!(!repo.mark_completed("t1", "worker-a", now).await.unwrap());

    assert!(repo.try_claim("t1", "worker-a", now).await.unwrap());
    assert!(!repo.mark_completed("t1", "worker-b", now).await.unwrap());
    assert!(!repo
        .record_attempt("t1", "worker-b", 2, "late", now)
        .await
        .unwrap());

    let task = repo.get_by_id("t1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.retry_count, 0);

    assert!(repo.mark_completed("t1", "worker-a", now).await.unwrap());
    assert_eq!(repo.get_by_id("t1").await.unwrap().status, TaskStatus::Completed);
}

#[test]
fn test_config_from_env() {
    let config = TestDbConfig::default();
    assert!(!config.host.is_empty());
    assert!(config.port > 0);
    assert!(config.database_url().starts_with("postgres://"));
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_postgres_migrations_and_cleanup() {
    let db = TestDatabase::postgres().await.unwrap();
    db.cleanup().await.unwrap();

    let result = db
        .conn
        .execute(sea_orm::Statement::from_string(
            sea_orm::DatabaseBackend::Postgres,
            "SELECT COUNT(*) FROM content_queue_item".to_string(),
        ))
        .await;
    assert!(result.is_ok(), "Query failed: {:?}", result.err());
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_postgres_queue_item_claim_is_exclusive() {
    let db = TestDatabase::postgres().await.unwrap();
    db.cleanup().await.unwrap();
    let item = seeded_item(&db, "pg-q1").await;
    ContentQueueItemRepository::insert_if_absent(
        db.conn.as_ref(),
        item.into_active_model().reset_all(),
    )
    .await
    .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|w| {
            let repo = ContentQueueItemRepository::new(db.connection());
            tokio::spawn(async move {
                repo.try_claim(
                    "pg-q1",
                    &format!("worker-{w}"),
                    &[QueueItemStatus::Scheduled],
                    Utc::now().into(),
                )
                .await
                .unwrap()
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_content_insert_skips_existing_canonical_url() {
    let db = TestDatabase::in_memory().await.unwrap();
    let repo = ContentRepository::new(db.connection());
    let existing = insert_parsed_content(db.conn.as_ref(), &["kept"], false, ReviewStatus::Approved)
        .await
        .unwrap();

    let mut duplicate = existing.clone();
    duplicate.id = "dup".to_string();
    duplicate.tags = json!(["lost"]);
    let inserted = repo
        .insert_if_absent(duplicate.into_active_model().reset_all())
        .await
        .unwrap();
    assert!(!inserted);

    let stored = repo
        .find_by_canonical_url(&existing.platform, &existing.canonical_url)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, existing.id);
    assert_eq!(stored.tag_list(), vec!["kept".to_string()]);

    let mut fresh = existing;
    fresh.id = "fresh".to_string();
    fresh.canonical_url = "https://example.com/post/fresh".to_string();
    assert!(
        repo.insert_if_absent(fresh.into_active_model().reset_all())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_queue_item_update_from_checks_status() {
    let db = TestDatabase::in_memory().await.unwrap();
    let repo = ContentQueueItemRepository::new(db.connection());
    let item = seeded_item(&db, "guarded").await;
    assert_eq!(item.status, QueueItemStatus::Scheduled);

    let mut am = item.clone().into_active_model();
    am.is_manual_schedule = Set(true);
    let updated = repo
        .update_from(am, &[QueueItemStatus::Failed])
        .await
        .unwrap();
    assert!(updated.is_none());
    assert!(!repo.get_by_id(&item.id).await.unwrap().is_manual_schedule);

    let mut am = item.clone().into_active_model();
    am.is_manual_schedule = Set(true);
    let updated = repo
        .update_from(am, &[QueueItemStatus::Failed, QueueItemStatus::Scheduled])
        .await
        .unwrap()
        .unwrap();
    assert!(updated.is_manual_schedule);
}
