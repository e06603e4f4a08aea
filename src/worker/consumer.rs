//! Queue consumer loop
//!
//! One consumer per stage queue. Each iteration checks shutdown and pause,
//! promotes due delayed publishes (publish queue only), then blocks on the
//! queue for at most one poll timeout. A store that stays unreachable after
//! retries ends the loop with an error so the supervisor can restart it.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use super::{WorkerContext, WorkerError};
use crate::metrics;
use crate::models::ActivityKind;
use crate::pipeline::{PipelineError, TaskHandler, TaskOutcome};
use crate::queue::{QueueName, Task};

pub async fn consume(
    ctx: WorkerContext,
    handler: Arc<dyn TaskHandler>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), WorkerError> {
    let queue = handler.queue();
    let timeout = ctx.timings.poll_timeout_for(queue);
    info!(queue = %queue, timeout_secs = timeout.as_secs(), "Consumer started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        if ctx.is_paused() {
            tokio::select! {
                _ = tokio::time::sleep(ctx.timings.pause_poll) => {}
                _ = shutdown.changed() => {}
            }
            continue;
        }

        if queue == QueueName::Publish {
            match ctx.pipeline.delayed.promote_due(Utc::now()).await {
                Ok(0) => {}
                Ok(promoted) => debug!(promoted, "Promoted due publishes"),
                Err(e) => warn!(error = %e, "Promotion failed, retrying next iteration"),
            }
        }

        let raw = match ctx.pipeline.queue.pop_raw(queue, timeout, ctx.pop_policy).await {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                error!(queue = %queue, error = %e, "Queue unreachable after retries");
                return Err(e.into());
            }
        };

        // Paused while blocked on the pop
        if ctx.is_paused() {
            hold(&ctx, &handler, queue, &raw).await;
            continue;
        }

        process(&ctx, &handler, queue, &raw).await;
    }

    info!(queue = %queue, "Consumer stopped");
    Ok(())
}

/// Put an entry popped during a pause back at the front of its queue
pub async fn hold(ctx: &WorkerContext, handler: &Arc<dyn TaskHandler>, queue: QueueName, raw: &str) {
    match ctx.pipeline.queue.push_back_raw(queue, raw).await {
        Ok(()) => debug!(queue = %queue, "Paused after pop, task returned to queue"),
        Err(e) => {
            warn!(queue = %queue, error = %e, "Could not return task to queue, handling it anyway");
            process(ctx, handler, queue, raw).await;
        }
    }
}

/// Decode and handle one raw entry
///
/// Never fails: undecodable entries are dropped and handler errors are
/// logged and counted. The handler runs on its own task, so a panic is
/// counted like any other handler error. Returns the outcome when the
/// handler ran to one.
pub async fn process(
    ctx: &WorkerContext,
    handler: &Arc<dyn TaskHandler>,
    queue: QueueName,
    raw: &str,
) -> Option<TaskOutcome> {
    let task = match Task::decode_for(raw, queue) {
        Ok(task) => task,
        Err(e) => {
            error!(queue = %queue, error = %e, "Dropping undecodable task");
            ctx.pipeline.stats.record_dropped();
            metrics::record_task(queue.list_name(), "dropped", Duration::ZERO);
            return None;
        }
    };

    let task_id = task.id;
    let kind = task.kind();
    let user_id = task.user_id().map(str::to_string);
    let started = Instant::now();
    let job = {
        let handler = Arc::clone(handler);
        tokio::spawn(async move { handler.handle(task).await })
    };
    let result = match job.await {
        Ok(result) => result,
        Err(e) => Err(PipelineError::Panicked(panic_message(e))),
    };
    let elapsed = started.elapsed();

    match result {
        Ok(outcome) => {
            match &outcome {
                TaskOutcome::Completed => {
                    debug!(task_id = %task_id, kind, elapsed_ms = elapsed.as_millis() as u64, "Task completed")
                }
                TaskOutcome::Skipped(reason) => {
                    info!(task_id = %task_id, kind, reason = %reason, "Task skipped")
                }
                TaskOutcome::Failed(reason) => {
                    warn!(task_id = %task_id, kind, reason = %reason, "Task failed");
                    ctx.pipeline.stats.record_failure();
                }
            }
            metrics::record_task(queue.list_name(), outcome.label(), elapsed);
            Some(outcome)
        }
        Err(e) if e.is_validation() => {
            error!(task_id = %task_id, kind, error = %e, "Dropping invalid task");
            ctx.pipeline.stats.record_dropped();
            metrics::record_task(queue.list_name(), "dropped", elapsed);
            None
        }
        Err(e) => {
            error!(task_id = %task_id, kind, error = %e, "Task errored");
            ctx.pipeline.stats.record_failure();
            metrics::record_task(queue.list_name(), "error", elapsed);
            ctx.pipeline
                .activity
                .note(
                    ActivityKind::WorkerError,
                    user_id.as_deref(),
                    format!("{kind} task failed: {e}"),
                )
                .await;
            None
        }
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(err) => err.to_string(),
    }
}
