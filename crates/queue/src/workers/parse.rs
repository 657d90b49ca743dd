//! Parse worker.

use std::sync::Arc;

use fanout_common::{AppResult, Metrics};
use fanout_core::services::{CollaboratorError, ContentService, ParserService, TaskQueue};
use fanout_db::entities::task::DeadLetterReason;
use tracing::{debug, info, warn};

use crate::retry::RetryConfig;
use crate::workers::TaskOutcome;

/// Context for the parse worker.
#[derive(Clone)]
pub struct ParseContext {
    pub content_service: ContentService,
    pub parser: ParserService,
    pub retry: RetryConfig,
    pub metrics: Arc<Metrics>,
}

/// Parse request as carried by a task.
#[derive(Debug, Clone)]
pub struct ParseRequest<'a> {
    pub task_id: &'a str,
    pub content_id: &'a str,
    /// Attempts already made before this run.
    pub attempts: u32,
    pub max_attempts: u32,
    pub force: bool,
}

fn dead_letter_reason(
    failure: &CollaboratorError,
    retry: &RetryConfig,
    attempts: u32,
) -> Option<DeadLetterReason> {
    match failure {
        CollaboratorError::AuthRequired(_) => Some(DeadLetterReason::AuthRequired),
        CollaboratorError::NonRetryable(_) => Some(DeadLetterReason::NonRetryable),
        CollaboratorError::Retryable(_) if !retry.should_retry(attempts) => {
            Some(DeadLetterReason::MaxAttemptsReached)
        }
        CollaboratorError::Retryable(_) => None,
    }
}

/// Parse one content, retrying retryable failures in place.
///
/// Every failed attempt is recorded on the content and on the task. Auth
/// and non-retryable failures end the task at once; retryable ones sleep
/// `initial_delay * 2^attempt` between attempts until `max_attempts`.
pub async fn parse_worker(
    request: ParseRequest<'_>,
    ctx: &ParseContext,
    task_queue: &TaskQueue,
) -> AppResult<TaskOutcome> {
    let Some(content) = ctx
        .content_service
        .begin_parse(request.content_id, request.force)
        .await?
    else {
        debug!(content_id = %request.content_id, "Nothing to parse");
        return Ok(TaskOutcome::Completed);
    };

    let retry = ctx.retry.clone().with_max_attempts(request.max_attempts);
    let mut attempts = request.attempts;

    info!(
        content_id = %content.id,
        platform = %content.platform,
        attempt = attempts + 1,
        "Parsing content"
    );

    loop {
        match ctx.parser.parse(&content.url, &content.platform).await {
            Ok(parsed) => {
                ctx.metrics.record_parse(true);
                ctx.content_service
                    .complete_parse(&content.id, parsed)
                    .await?;
                return Ok(TaskOutcome::Completed);
            }
            Err(failure) => {
                attempts += 1;
                ctx.metrics.record_parse(false);

                let reason = dead_letter_reason(&failure, &retry, attempts);
                ctx.content_service
                    .record_parse_failure(&content.id, &failure, reason.is_some())
                    .await?;

                if let Some(reason) = reason {
                    return Ok(TaskOutcome::DeadLetter {
                        reason,
                        error: failure.to_string(),
                        attempts,
                    });
                }

                if !task_queue
                    .record_attempt(
                        request.task_id,
                        i32::try_from(attempts).unwrap_or(i32::MAX),
                        &failure.to_string(),
                    )
                    .await?
                {
                    return Ok(TaskOutcome::Released);
                }

                let delay = retry.delay_for_attempt(attempts - 1);
                warn!(
                    content_id = %content.id,
                    attempt = attempts,
                    max_attempts = retry.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %failure,
                    "Retrying parse"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_classification() {
        let retry = RetryConfig::default().with_max_attempts(3);

        assert_eq!(
            dead_letter_reason(&CollaboratorError::AuthRequired("cookie".into()), &retry, 1),
            Some(DeadLetterReason::AuthRequired)
        );
        assert_eq!(
            dead_letter_reason(&CollaboratorError::NonRetryable("gone".into()), &retry, 1),
            Some(DeadLetterReason::NonRetryable)
        );
        assert_eq!(
            dead_letter_reason(&CollaboratorError::Retryable("503".into()), &retry, 2),
            None
        );
        assert_eq!(
            dead_letter_reason(&CollaboratorError::Retryable("503".into()), &retry, 3),
            Some(DeadLetterReason::MaxAttemptsReached)
        );
    }
}
