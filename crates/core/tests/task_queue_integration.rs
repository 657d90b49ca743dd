//! Task queue and content lifecycle integration tests.
//!
//! Run with: `cargo test -p fanout-core --test task_queue_integration`

#![allow(clippy::unwrap_used)]

mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::Pipeline;
use fanout_common::AppError;
use fanout_core::services::jobs::{PRIORITY_MANUAL, PRIORITY_NORMAL};
use fanout_core::{CreateContentInput, Job};
use fanout_db::entities::content::ContentStatus;
use fanout_db::entities::task::{DeadLetterReason, TaskStatus};
use fanout_db::repositories::TaskRepository;

fn parse_job(content_id: &str) -> Job {
    Job::Parse {
        content_id: content_id.to_string(),
        attempt: 0,
        max_attempts: 3,
        force: false,
    }
}

#[tokio::test]
async fn test_concurrent_dequeue_claims_each_task_once() {
    let p = Pipeline::new().await;
    for i in 0..20 {
        p.task_queue
            .enqueue(&parse_job(&format!("c{i}")), PRIORITY_NORMAL)
            .await
            .unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|w| {
            let queue = p.task_queue.for_worker(format!("worker-{w}"));
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(task) = queue.dequeue(Duration::ZERO).await.unwrap() {
                    claimed.push(task.task.id);
                }
                claimed
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);

    let stats = p.task_queue.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.running, 20);
}

#[tokio::test]
async fn test_dequeue_prefers_priority_then_age() {
    let p = Pipeline::new().await;
    let first = p.task_queue.enqueue(&parse_job("a"), PRIORITY_NORMAL).await.unwrap();
    let second = p.task_queue.enqueue(&parse_job("b"), PRIORITY_NORMAL).await.unwrap();
    let urgent = p.task_queue.enqueue(&parse_job("c"), PRIORITY_MANUAL).await.unwrap();

    let mut claimed = Vec::new();
    while let Some(task) = p.task_queue.dequeue(Duration::ZERO).await.unwrap() {
        claimed.push(task.task.id);
    }
    assert_eq!(claimed, vec![urgent, first, second]);
}

#[tokio::test]
async fn test_dequeue_times_out_on_empty_queue() {
    let p = Pipeline::new().await;
    let started = std::time::Instant::now();
    let claimed = p.task_queue.dequeue(Duration::from_millis(30)).await.unwrap();
    assert!(claimed.is_none());
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_dead_letter_and_recovery() {
    let p = Pipeline::new().await;
    let repo = TaskRepository::new(p.db.connection());

    let doomed = p.task_queue.enqueue(&parse_job("x"), PRIORITY_NORMAL).await.unwrap();
    let stuck = p.task_queue.enqueue(&parse_job("y"), PRIORITY_NORMAL).await.unwrap();
    p.task_queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    p.task_queue.dequeue(Duration::ZERO).await.unwrap().unwrap();

    p.task_queue
        .push_dead_letter(&doomed, DeadLetterReason::AuthRequired, "login expired", 1)
        .await
        .unwrap();
    let task = repo.get_by_id(&doomed).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure_reason, Some(DeadLetterReason::AuthRequired));
    assert_eq!(task.last_error.as_deref(), Some("login expired"));

    let dead = p.task_queue.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, doomed);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(p.task_queue.recover_stuck(Duration::ZERO).await.unwrap(), 1);
    let task = repo.get_by_id(&stuck).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.worker_id.is_none());

    // The recovered task is claimable again.
    let again = p.task_queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(again.task.id, stuck);
}

#[tokio::test]
async fn test_recovered_task_is_settled_by_new_owner_only() {
    let p = Pipeline::new().await;
    let repo = TaskRepository::new(p.db.connection());
    let slow = p.task_queue.for_worker("slow-worker".to_string());
    let fresh = p.task_queue.for_worker("fresh-worker".to_string());

    let id = p.task_queue.enqueue(&parse_job("a"), PRIORITY_NORMAL).await.unwrap();
    slow.dequeue(Duration::ZERO).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(p.task_queue.recover_stuck(Duration::ZERO).await.unwrap(), 1);
    let again = fresh.dequeue(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(again.task.id, id);

    // The first worker finishing late writes nothing.
    assert!(!slow.record_attempt(&id, 2, "late failure").await.unwrap());
    assert!(!slow.mark_complete(&id).await.unwrap());
    assert!(
        !slow
            .push_dead_letter(&id, DeadLetterReason::NonRetryable, "late failure", 2)
            .await
            .unwrap()
    );
    let task = repo.get_by_id(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.worker_id.as_deref(), Some("fresh-worker"));
    assert_eq!(task.retry_count, 0);
    assert!(task.last_error.is_none());

    assert!(fresh.mark_complete(&id).await.unwrap());
    assert_eq!(repo.get_by_id(&id).await.unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_purge_keeps_failed_tasks() {
    let p = Pipeline::new().await;
    let done = p.task_queue.enqueue(&parse_job("a"), PRIORITY_NORMAL).await.unwrap();
    let failed = p.task_queue.enqueue(&parse_job("b"), PRIORITY_NORMAL).await.unwrap();
    p.task_queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    p.task_queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    p.task_queue.mark_complete(&done).await.unwrap();
    p.task_queue
        .push_dead_letter(&failed, DeadLetterReason::NonRetryable, "gone", 1)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(p.task_queue.purge_completed(0).await.unwrap(), 1);

    let stats = p.task_queue.stats().await.unwrap();
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_create_content_enqueues_parse_and_merges_duplicates() {
    let p = Pipeline::new().await;
    let first = p
        .content
        .create_content(CreateContentInput {
            url: "https://www.bilibili.com/video/BV1xx?utm_source=share#reply".to_string(),
            tags: vec!["anime".to_string()],
            source: None,
            platform: None,
            is_nsfw: false,
        })
        .await
        .unwrap();
    assert_eq!(first.status, ContentStatus::Unprocessed);
    assert_eq!(first.platform, "bilibili");

    let claimed = p.task_queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    assert!(matches!(claimed.job, Job::Parse { ref content_id, .. } if *content_id == first.id));

    let second = p
        .content
        .create_content(CreateContentInput {
            url: "https://bilibili.com/video/BV1xx".to_string(),
            tags: vec!["Anime".to_string(), "music".to_string()],
            source: None,
            platform: None,
            is_nsfw: false,
        })
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.tag_list(), vec!["anime".to_string(), "music".to_string()]);

    // No second parse task for the merged content.
    assert!(p.task_queue.dequeue(Duration::ZERO).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_shares_of_one_link_create_once() {
    let p = Pipeline::new().await;
    let share = |url: &str, tag: &str| CreateContentInput {
        url: url.to_string(),
        tags: vec![tag.to_string()],
        source: None,
        platform: None,
        is_nsfw: false,
    };

    let (a, b) = tokio::join!(
        p.content
            .create_content(share("https://example.com/post/7?utm_source=a", "first")),
        p.content
            .create_content(share("https://example.com/post/7#top", "second")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.id, b.id);

    let stored = p.content.get(&a.id).await.unwrap();
    let tags: HashSet<_> = stored.tag_list().into_iter().collect();
    assert_eq!(
        tags,
        HashSet::from(["first".to_string(), "second".to_string()])
    );

    assert!(p.task_queue.dequeue(Duration::ZERO).await.unwrap().is_some());
    assert!(p.task_queue.dequeue(Duration::ZERO).await.unwrap().is_none());
}

#[tokio::test]
async fn test_parse_claim_is_exclusive_and_reparse_guards() {
    let p = Pipeline::new().await;
    let content = p
        .content
        .create_content(CreateContentInput {
            url: "https://example.com/post/42".to_string(),
            tags: vec![],
            source: Some("test".to_string()),
            platform: None,
            is_nsfw: false,
        })
        .await
        .unwrap();

    assert!(p.content.begin_parse(&content.id, false).await.unwrap().is_some());
    assert!(p.content.begin_parse(&content.id, false).await.unwrap().is_none());

    let result = p.content.reparse(&content.id, true).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    p.content
        .complete_parse(&content.id, fanout_core::NormalizedContent::default())
        .await
        .unwrap();
    assert!(matches!(
        p.content.reparse(&content.id, false).await,
        Err(AppError::Conflict(_))
    ));
    assert!(p.content.reparse(&content.id, true).await.is_ok());
}

#[tokio::test]
async fn test_enqueue_caps_oversized_attempt_budget() {
    let p = Pipeline::new().await;
    let id = p
        .task_queue
        .enqueue(
            &Job::Parse {
                content_id: "huge".to_string(),
                attempt: 0,
                max_attempts: u32::MAX,
                force: false,
            },
            PRIORITY_NORMAL,
        )
        .await
        .unwrap();

    let task = TaskRepository::new(p.db.connection())
        .get_by_id(&id)
        .await
        .unwrap();
    assert_eq!(task.max_retries, i32::MAX);
}
