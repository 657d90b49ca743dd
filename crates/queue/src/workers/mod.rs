//! Task workers.

mod distribute;
mod parse;

pub use distribute::{DeliveryOutcome, DistributeContext, distribute_worker};
pub use parse::{ParseContext, ParseRequest, parse_worker};

use std::time::Duration;

use fanout_core::services::{ClaimedTask, Job, TaskQueue};
use fanout_db::entities::task::DeadLetterReason;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How a worker finished a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task is done.
    Completed,
    /// The task failed for good.
    DeadLetter {
        reason: DeadLetterReason,
        error: String,
        attempts: u32,
    },
    /// The task was taken from this worker mid-run; its new owner settles it.
    Released,
}

/// Everything a worker loop needs.
#[derive(Clone)]
pub struct WorkerContext {
    pub task_queue: TaskQueue,
    pub parse: ParseContext,
    pub distribute: DistributeContext,
    /// Maximum wait of a single dequeue call.
    pub poll_timeout: Duration,
}

/// Run one worker loop until `shutdown` is canceled.
///
/// A task that is already running when shutdown is requested finishes
/// first; the loop only stops between tasks.
pub async fn run_worker(ctx: WorkerContext, shutdown: CancellationToken) {
    let worker_id = ctx.task_queue.worker_id().to_string();
    info!(worker_id = %worker_id, "Worker started");

    loop {
        let claimed = tokio::select! {
            () = shutdown.cancelled() => break,
            claimed = ctx.task_queue.dequeue(ctx.poll_timeout) => claimed,
        };

        match claimed {
            Ok(Some(claimed)) => execute(&ctx, claimed).await,
            Ok(None) => {}
            Err(e) => {
                error!(worker_id = %worker_id, error = %e, "Dequeue failed");
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(ctx.poll_timeout.max(Duration::from_secs(1))) => {}
                }
            }
        }
    }

    info!(worker_id = %worker_id, "Worker stopped");
}

/// Run a claimed task and settle it.
pub async fn execute(ctx: &WorkerContext, claimed: ClaimedTask) {
    let ClaimedTask { task, job } = claimed;
    let task_id = task.id.as_str();

    let result = match &job {
        Job::Parse {
            content_id,
            attempt,
            max_attempts,
            force,
        } => {
            let request = ParseRequest {
                task_id,
                content_id,
                attempts: (*attempt).max(u32::try_from(task.retry_count).unwrap_or(0)),
                max_attempts: *max_attempts,
                force: *force,
            };
            parse_worker(request, &ctx.parse, &ctx.task_queue).await
        }
        Job::Distribute {
            queue_item_id,
            force,
        } => {
            distribute_worker(
                queue_item_id,
                *force,
                ctx.task_queue.worker_id(),
                &ctx.distribute,
            )
            .await
        }
    };

    let settled = match result {
        Ok(TaskOutcome::Completed) => ctx.task_queue.mark_complete(task_id).await,
        Ok(TaskOutcome::DeadLetter {
            reason,
            error,
            attempts,
        }) => {
            ctx.task_queue
                .push_dead_letter(
                    task_id,
                    reason,
                    &error,
                    i32::try_from(attempts).unwrap_or(i32::MAX),
                )
                .await
        }
        Ok(TaskOutcome::Released) => Ok(false),
        Err(e) if e.is_client_error() => {
            ctx.task_queue
                .push_dead_letter(
                    task_id,
                    DeadLetterReason::NonRetryable,
                    &e.to_string(),
                    task.retry_count,
                )
                .await
        }
        Err(e) => {
            // Left RUNNING; the janitor returns it to PENDING.
            warn!(task_id = %task_id, task_type = job.task_type(), error = %e, "Task failed");
            Ok(false)
        }
    };

    if let Err(e) = settled {
        error!(task_id = %task_id, error = %e, "Failed to settle task");
    }
}
