//! Content service.

use chrono::Utc;
use fanout_common::config::WorkerConfig;
use fanout_common::{AppError, AppResult, IdGenerator, canonicalize_url, normalize_tags};
use fanout_db::entities::content::{self, ContentStatus, ReviewStatus};
use fanout_db::repositories::ContentRepository;
use sea_orm::{IntoActiveModel, Set};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::services::collaborators::{CollaboratorError, NormalizedContent};
use crate::services::decision::matches_auto_approval;
use crate::services::distribution::DistributionService;
use crate::services::event_publisher::{EventPublisherService, notify_content};
use crate::services::jobs::{Job, PRIORITY_MANUAL, PRIORITY_NORMAL};
use crate::services::task_queue::TaskQueue;

/// Input for creating content from a shared URL.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateContentInput {
    #[validate(length(min = 1, max = 2048))]
    pub url: String,

    #[validate(length(max = 64))]
    #[serde(default)]
    pub tags: Vec<String>,

    #[validate(length(max = 64))]
    pub source: Option<String>,

    /// Overrides platform detection.
    #[validate(length(min = 1, max = 32))]
    pub platform: Option<String>,

    #[serde(default)]
    pub is_nsfw: bool,
}

/// A review decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
}

/// Content service for business logic.
#[derive(Clone)]
pub struct ContentService {
    content_repo: ContentRepository,
    distribution: DistributionService,
    task_queue: TaskQueue,
    parse_max_attempts: u32,
    event_publisher: Option<EventPublisherService>,
    id_gen: IdGenerator,
}

impl ContentService {
    /// Create a new content service.
    #[must_use]
    pub fn new(
        content_repo: ContentRepository,
        distribution: DistributionService,
        task_queue: TaskQueue,
        worker: &WorkerConfig,
    ) -> Self {
        Self {
            content_repo,
            distribution,
            task_queue,
            parse_max_attempts: worker.parse_max_attempts,
            event_publisher: None,
            id_gen: IdGenerator::new(),
        }
    }

    /// Set the event publisher.
    pub fn set_event_publisher(&mut self, publisher: EventPublisherService) {
        self.event_publisher = Some(publisher);
    }

    /// Get a content by ID.
    pub async fn get(&self, id: &str) -> AppResult<content::Model> {
        self.content_repo.get_by_id(id).await
    }

    /// Create content from a shared URL, or merge tags into the existing
    /// content with the same canonical URL.
    ///
    /// New content gets a parse task.
    pub async fn create_content(&self, input: CreateContentInput) -> AppResult<content::Model> {
        input.validate()?;

        let link = canonicalize_url(&input.url)?;
        let platform = input.platform.clone().unwrap_or(link.platform);
        let tags = normalize_tags(&input.tags);

        if let Some(existing) = self
            .content_repo
            .find_by_canonical_url(&platform, &link.canonical_url)
            .await?
        {
            return self.merge_tags(existing, &tags).await;
        }

        let now = Utc::now();
        let id = self.id_gen.generate();
        let model = content::ActiveModel {
            id: Set(id.clone()),
            platform: Set(platform.clone()),
            url: Set(input.url.trim().to_string()),
            canonical_url: Set(link.canonical_url.clone()),
            status: Set(ContentStatus::Unprocessed),
            review_status: Set(ReviewStatus::Pending),
            tags: Set(json!(tags)),
            is_nsfw: Set(input.is_nsfw),
            source: Set(input.source),
            title: Set(None),
            body: Set(None),
            cover_url: Set(None),
            media_urls: Set(json!([])),
            author_name: Set(None),
            author_id: Set(None),
            author_url: Set(None),
            stats: Set(json!({})),
            failure_count: Set(0),
            last_error: Set(None),
            last_error_type: Set(None),
            last_error_at: Set(None),
            reviewed_at: Set(None),
            reviewed_by: Set(None),
            review_note: Set(None),
            published_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(None),
        };
        if !self.content_repo.insert_if_absent(model).await? {
            // A concurrent share of the same link inserted first.
            let existing = self
                .content_repo
                .find_by_canonical_url(&platform, &link.canonical_url)
                .await?
                .ok_or_else(|| {
                    AppError::Conflict(format!(
                        "content for {} vanished mid-create",
                        link.canonical_url
                    ))
                })?;
            return self.merge_tags(existing, &tags).await;
        }
        let created = self.content_repo.get_by_id(&id).await?;

        self.task_queue
            .enqueue(
                &Job::Parse {
                    content_id: created.id.clone(),
                    attempt: 0,
                    max_attempts: self.parse_max_attempts,
                    force: false,
                },
                PRIORITY_NORMAL,
            )
            .await?;

        info!(
            content_id = %created.id,
            platform = %created.platform,
            url = %created.canonical_url,
            "Content created"
        );
        notify_content(self.event_publisher.as_ref(), &created).await;
        Ok(created)
    }

    /// Merge `tags` into existing content, writing only when something new
    /// was added.
    async fn merge_tags(
        &self,
        existing: content::Model,
        tags: &[String],
    ) -> AppResult<content::Model> {
        let merged = normalize_tags(existing.tag_list().iter().chain(tags.iter()));
        if merged.len() == existing.tag_list().len() {
            debug!(content_id = %existing.id, "Content already exists");
            return Ok(existing);
        }
        let mut am = existing.into_active_model();
        am.tags = Set(json!(merged));
        am.updated_at = Set(Some(Utc::now().into()));
        let updated = self.content_repo.update(am).await?;
        info!(content_id = %updated.id, tags = ?merged, "Merged tags into existing content");
        Ok(updated)
    }

    /// Approve or reject a content.
    ///
    /// Approval expands the content into queue items; rejection cancels its
    /// active items. Both compact the affected destinations.
    pub async fn set_review_status(
        &self,
        content_id: &str,
        action: ReviewAction,
        note: Option<String>,
        reviewer: Option<String>,
    ) -> AppResult<content::Model> {
        let existing = self.content_repo.get_by_id(content_id).await?;

        let mut am = existing.into_active_model();
        am.review_status = Set(match action {
            ReviewAction::Approve => ReviewStatus::Approved,
            ReviewAction::Reject => ReviewStatus::Rejected,
        });
        am.reviewed_at = Set(Some(Utc::now().into()));
        am.reviewed_by = Set(reviewer);
        am.review_note = Set(note);
        am.updated_at = Set(Some(Utc::now().into()));
        let updated = self.content_repo.update(am).await?;

        info!(content_id = %content_id, action = ?action, "Content reviewed");
        notify_content(self.event_publisher.as_ref(), &updated).await;

        match action {
            ReviewAction::Approve => {
                self.distribution.enqueue_content(content_id, false).await?;
            }
            ReviewAction::Reject => {
                self.distribution
                    .cancel_for_content(content_id, "rejected")
                    .await?;
            }
        }
        self.distribution.compact_for_content(content_id).await?;

        Ok(updated)
    }

    /// Enqueue a new parse task for a content.
    ///
    /// Already parsed content needs `force`. Content being parsed cannot be
    /// re-parsed.
    pub async fn reparse(&self, content_id: &str, force: bool) -> AppResult<String> {
        let content = self.content_repo.get_by_id(content_id).await?;
        match content.status {
            ContentStatus::Processing => {
                return Err(AppError::Conflict(format!(
                    "content {content_id} is being parsed"
                )));
            }
            ContentStatus::ParseSuccess if !force => {
                return Err(AppError::Conflict(format!(
                    "content {content_id} is already parsed, use force to re-parse"
                )));
            }
            _ => {}
        }

        let task_id = self
            .task_queue
            .enqueue(
                &Job::Parse {
                    content_id: content_id.to_string(),
                    attempt: 0,
                    max_attempts: self.parse_max_attempts,
                    force,
                },
                PRIORITY_MANUAL,
            )
            .await?;
        info!(content_id = %content_id, task_id = %task_id, force, "Re-parse enqueued");
        Ok(task_id)
    }

    /// Claim a content for parsing.
    ///
    /// Returns `None` when the content is already parsed (and `force` is not
    /// set) or another worker is parsing it.
    pub async fn begin_parse(
        &self,
        content_id: &str,
        force: bool,
    ) -> AppResult<Option<content::Model>> {
        let mut from = vec![ContentStatus::Unprocessed, ContentStatus::ParseFailed];
        if force {
            from.push(ContentStatus::ParseSuccess);
        }
        if !self
            .content_repo
            .try_mark_processing(content_id, &from)
            .await?
        {
            let current = self.content_repo.get_by_id(content_id).await?;
            debug!(content_id = %content_id, status = ?current.status, "Content not claimable for parsing");
            return Ok(None);
        }

        let content = self.content_repo.get_by_id(content_id).await?;
        debug!(content_id = %content_id, "Content parsing");
        notify_content(self.event_publisher.as_ref(), &content).await;
        Ok(Some(content))
    }

    /// Store a parse result, run the auto-approval pass and expand.
    pub async fn complete_parse(
        &self,
        content_id: &str,
        parsed: NormalizedContent,
    ) -> AppResult<content::Model> {
        let existing = self.content_repo.get_by_id(content_id).await?;
        let tags = normalize_tags(existing.tag_list().iter().chain(parsed.tags.iter()));
        let is_nsfw = parsed.is_nsfw.unwrap_or(existing.is_nsfw);
        let now = Utc::now();

        let mut am = existing.into_active_model();
        am.status = Set(ContentStatus::ParseSuccess);
        am.title = Set(parsed.title);
        am.body = Set(parsed.body);
        am.cover_url = Set(parsed.cover_url);
        am.media_urls = Set(json!(parsed.media_urls));
        am.author_name = Set(parsed.author_name);
        am.author_id = Set(parsed.author_id);
        am.author_url = Set(parsed.author_url);
        am.tags = Set(json!(tags));
        am.is_nsfw = Set(is_nsfw);
        if !parsed.stats.is_null() {
            am.stats = Set(parsed.stats);
        }
        am.published_at = Set(parsed.published_at.map(Into::into));
        am.last_error = Set(None);
        am.last_error_type = Set(None);
        am.updated_at = Set(Some(now.into()));
        let mut content = self.content_repo.update(am).await?;
        info!(content_id = %content_id, "Content parsed");

        if content.review_status == ReviewStatus::Pending {
            content = self.auto_approve(content).await?;
        }
        notify_content(self.event_publisher.as_ref(), &content).await;

        self.distribution.enqueue_content(content_id, false).await?;
        Ok(content)
    }

    /// First enabled rule whose auto-approval conditions match approves the
    /// content.
    async fn auto_approve(&self, content: content::Model) -> AppResult<content::Model> {
        let rules = self.distribution.load_rules().await?;
        let Some(rule) = rules.iter().find(|r| matches_auto_approval(r, &content)) else {
            return Ok(content);
        };

        let content_id = content.id.clone();
        let mut am = content.into_active_model();
        am.review_status = Set(ReviewStatus::AutoApproved);
        am.reviewed_at = Set(Some(Utc::now().into()));
        am.reviewed_by = Set(Some(format!("auto:{}", rule.rule.name)));
        am.updated_at = Set(Some(Utc::now().into()));
        let updated = self.content_repo.update(am).await?;

        info!(content_id = %content_id, rule = %rule.rule.name, "Content auto-approved");
        Ok(updated)
    }

    /// Record a failed parse attempt on the content.
    ///
    /// A terminal failure moves the content to PARSE_FAILED; otherwise it
    /// stays PROCESSING for the next attempt.
    pub async fn record_parse_failure(
        &self,
        content_id: &str,
        failure: &CollaboratorError,
        terminal: bool,
    ) -> AppResult<()> {
        let status = if terminal {
            ContentStatus::ParseFailed
        } else {
            ContentStatus::Processing
        };
        self.content_repo
            .record_failure(content_id, status, &failure.to_string(), failure.kind())
            .await?;

        if terminal {
            error!(content_id = %content_id, kind = failure.kind(), error = %failure, "Parse failed");
            if let Ok(content) = self.content_repo.get_by_id(content_id).await {
                notify_content(self.event_publisher.as_ref(), &content).await;
            }
        } else {
            warn!(content_id = %content_id, error = %failure, "Parse attempt failed, retrying");
        }
        Ok(())
    }

    /// Return contents stuck in PROCESSING for longer than `timeout` to
    /// PARSE_FAILED.
    pub async fn release_stuck(&self, timeout: std::time::Duration) -> AppResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(timeout).unwrap_or_default();
        let count = self
            .content_repo
            .release_stuck_processing(cutoff.into())
            .await?;
        if count > 0 {
            warn!(count, "Released contents stuck in processing");
        }
        Ok(count)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_create_input_validation() {
        let input: CreateContentInput = serde_json::from_value(json!({
            "url": "",
            "tags": ["a"]
        }))
        .unwrap();
        assert!(input.validate().is_err());

        let input: CreateContentInput = serde_json::from_value(json!({
            "url": "https://example.com/post/1",
            "isNsfw": true
        }))
        .unwrap();
        assert!(input.validate().is_ok());
        assert!(input.is_nsfw);
        assert!(input.tags.is_empty());
    }

    #[test]
    fn test_review_action_decoding() {
        let action: ReviewAction = serde_json::from_value(json!("approve")).unwrap();
        assert_eq!(action, ReviewAction::Approve);
        assert!(serde_json::from_value::<ReviewAction>(json!("maybe")).is_err());
    }
}
