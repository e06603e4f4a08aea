//! Publish stage
//!
//! Checks run in order: due time, platform enabled, daily quota, connected
//! account. Ineligible publishes are skipped and leave the post's status
//! alone; over-quota publishes can be deferred to the next posting window.
//! The quota is counted only after the platform confirms the publish.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use super::{PipelineContext, PipelineError, TaskHandler, TaskOutcome};
use crate::metrics;
use crate::models::{ActivityKind, ActivityRecord, GeneratedPost, PostStatus, UserSettings};
use crate::queue::{QueueName, Task, TaskPayload};
use crate::scheduler::SpreadScheduler;

pub struct PublishHandler {
    ctx: PipelineContext,
}

impl PublishHandler {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    async fn publish(
        &self,
        task: &Task,
        post: &GeneratedPost,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<TaskOutcome, PipelineError> {
        let now = Utc::now();
        if let Some(due_at) = due_at.filter(|due| *due > now) {
            self.ctx.delayed.schedule(task, due_at).await?;
            info!(task_id = %task.id, due_at = %due_at, "Publish not yet due, re-indexed");
            return Ok(TaskOutcome::skipped("not yet due"));
        }

        let user_id = post.user_id.as_str();
        let platform = post.platform;
        let settings = self.ctx.settings.get(user_id).await;

        if !settings.platform_enabled(platform) {
            self.skip_activity(user_id, post, "platform_disabled").await;
            return Ok(TaskOutcome::skipped(format!("{platform} is disabled")));
        }

        match self
            .ctx
            .quota
            .can_publish(user_id, settings.max_posts_per_day)
            .await
        {
            Ok(true) => {}
            Ok(false) => return self.over_quota(post, &settings, now).await,
            Err(e) => warn!(user_id, error = %e, "Quota check failed, publishing anyway"),
        }

        let accounts = self
            .ctx
            .collaborators
            .records
            .connected_accounts(user_id, Some(platform))
            .await?;
        let account = accounts
            .iter()
            .find(|a| a.platform == platform && a.active)
            .or_else(|| accounts.iter().find(|a| a.platform == platform));

        let Some(account) = account else {
            return Ok(self
                .failed(task, post, format!("no {platform} account configured"))
                .await);
        };
        if !account.active {
            self.skip_activity(user_id, post, "account_inactive").await;
            return Ok(TaskOutcome::skipped(format!("{platform} account is inactive")));
        }

        let key = post.idempotency_key();
        match self
            .ctx
            .collaborators
            .publisher
            .publish(post, account, &key)
            .await
        {
            Ok(outcome) if outcome.success => {
                self.count_publish(user_id, settings.max_posts_per_day).await;
                if let Some(record_id) = post.record_id() {
                    self.ctx
                        .posts
                        .advance(
                            record_id,
                            from_status(task),
                            PostStatus::Published,
                            json!({
                                "platform_post_id": outcome.platform_post_id,
                                "platform_url": outcome.platform_url,
                                "published_at": Utc::now(),
                            }),
                        )
                        .await;
                }
                self.ctx.stats.record_published();
                metrics::record_publish(platform.as_str(), "success");
                self.ctx
                    .activity
                    .record(
                        ActivityRecord::new(
                            ActivityKind::PostPublished,
                            Some(user_id),
                            format!("Published to {platform}"),
                        )
                        .with_details(json!({
                            "platform": platform,
                            "platform_url": outcome.platform_url,
                        })),
                    )
                    .await;
                info!(user_id, platform = %platform, "Post published");
                Ok(TaskOutcome::Completed)
            }
            Ok(outcome) => {
                let reason = outcome
                    .error
                    .unwrap_or_else(|| "publisher reported failure".to_string());
                Ok(self.failed(task, post, reason).await)
            }
            Err(e) => Ok(self.failed(task, post, e.to_string()).await),
        }
    }

    /// Defer to the next posting window, or skip; the status stays as it is
    async fn over_quota(
        &self,
        post: &GeneratedPost,
        settings: &UserSettings,
        now: DateTime<Utc>,
    ) -> Result<TaskOutcome, PipelineError> {
        metrics::record_quota_skip();
        let user_id = post.user_id.as_str();

        if self.ctx.options.defer_over_quota {
            let at = SpreadScheduler::from_settings(settings).next_window_start(now);
            let mut deferred = post.clone();
            deferred.scheduled_time = Some(at);
            self.ctx
                .delayed
                .schedule(&Task::publish_scheduled(deferred, at), at)
                .await?;
            self.ctx
                .activity
                .record(
                    ActivityRecord::new(
                        ActivityKind::PublishingDeferred,
                        Some(user_id),
                        format!("Daily limit reached, {} post deferred to {at}", post.platform),
                    )
                    .with_details(json!({ "platform": post.platform, "deferred_to": at })),
                )
                .await;
            return Ok(TaskOutcome::skipped(format!("daily limit reached, deferred to {at}")));
        }

        self.skip_activity(user_id, post, "publishing_skipped_limit").await;
        Ok(TaskOutcome::skipped("daily limit reached"))
    }

    async fn count_publish(&self, user_id: &str, daily_limit: i64) {
        match self.ctx.quota.increment(user_id).await {
            Ok(count) if daily_limit > 0 && count > daily_limit => {
                warn!(user_id, count, daily_limit, "Daily limit overshot by concurrent publishes");
            }
            Ok(_) => {}
            Err(e) => warn!(user_id, error = %e, "Failed to count publish against quota"),
        }
    }

    async fn failed(&self, task: &Task, post: &GeneratedPost, reason: String) -> TaskOutcome {
        let user_id = post.user_id.as_str();
        warn!(user_id, platform = %post.platform, reason = %reason, "Publish failed");

        if let Some(record_id) = post.record_id() {
            self.ctx
                .posts
                .advance(
                    record_id,
                    from_status(task),
                    PostStatus::Failed,
                    json!({ "error": reason }),
                )
                .await;
        }
        metrics::record_publish(post.platform.as_str(), "failed");
        self.ctx
            .activity
            .record(
                ActivityRecord::new(
                    ActivityKind::PublishingError,
                    Some(user_id),
                    format!("Publishing to {} failed", post.platform),
                )
                .with_details(json!({ "platform": post.platform, "error": reason })),
            )
            .await;
        TaskOutcome::Failed(reason)
    }

    async fn skip_activity(&self, user_id: &str, post: &GeneratedPost, reason: &str) {
        info!(user_id, platform = %post.platform, reason, "Publish skipped");
        self.ctx
            .activity
            .record(
                ActivityRecord::new(
                    ActivityKind::PublishingSkipped,
                    Some(user_id),
                    format!("Skipped {} post", post.platform),
                )
                .with_details(json!({ "platform": post.platform, "reason": reason })),
            )
            .await;
    }
}

/// Status a generated post is in when its publish task runs
fn from_status(task: &Task) -> PostStatus {
    match task.payload {
        TaskPayload::PublishScheduled { .. } => PostStatus::Scheduled,
        _ => PostStatus::Generated,
    }
}

#[async_trait]
impl TaskHandler for PublishHandler {
    fn queue(&self) -> QueueName {
        QueueName::Publish
    }

    async fn handle(&self, task: Task) -> Result<TaskOutcome, PipelineError> {
        match &task.payload {
            TaskPayload::PublishImmediate { post } => self.publish(&task, post, None).await,
            TaskPayload::PublishScheduled { post, due_at } => {
                self.publish(&task, post, Some(*due_at)).await
            }
            _ => Err(PipelineError::invalid(task.kind(), "not a publish task")),
        }
    }
}
