//! Generation stage
//!
//! Rewrites a source post per platform, then plans when each rewrite goes
//! out. Due rewrites go straight to the publish queue; later ones wait in
//! the delayed index. Nothing is queued when auto-publish is off or the
//! daily quota is already used up.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use super::{PipelineContext, PipelineError, TaskHandler, TaskOutcome};
use crate::metrics;
use crate::models::{ActivityKind, ActivityRecord, GeneratedPost, Platform, Post, PostStatus, UserSettings};
use crate::queue::{QueueName, Task, TaskPayload};
use crate::scheduler::SpreadScheduler;

pub struct GenerationHandler {
    ctx: PipelineContext,
}

impl GenerationHandler {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    async fn generate(
        &self,
        user_id: &str,
        post: &Post,
        settings: &UserSettings,
    ) -> Result<TaskOutcome, PipelineError> {
        self.ctx
            .posts
            .advance(&post.id, PostStatus::Processing, PostStatus::Generating, json!({}))
            .await;

        let generated = match self.ctx.collaborators.generator.generate(post, settings).await {
            Ok(generated) if !generated.is_empty() => generated,
            Ok(_) => return Ok(self.fail(user_id, post, "generator returned no posts").await),
            Err(e) => return Ok(self.fail(user_id, post, &e.to_string()).await),
        };

        let generated: Vec<GeneratedPost> = generated
            .into_iter()
            .map(|mut g| {
                if g.user_id.is_empty() {
                    g.user_id = user_id.to_string();
                }
                if g.source_post_id.is_none() {
                    g.source_post_id = Some(post.id.clone());
                }
                g
            })
            .collect();

        self.ctx
            .posts
            .advance(
                &post.id,
                PostStatus::Generating,
                PostStatus::Generated,
                json!({ "generated": generated.len() }),
            )
            .await;
        self.ctx.stats.add_generated(generated.len() as u64);
        self.ctx
            .activity
            .record(
                ActivityRecord::new(
                    ActivityKind::ContentGenerated,
                    Some(user_id),
                    format!("Generated {} posts for {}", generated.len(), post.title),
                )
                .with_details(json!({
                    "post_id": post.id,
                    "platforms": generated.iter().map(|g| g.platform).collect::<Vec<_>>(),
                })),
            )
            .await;

        if !settings.auto_publish {
            info!(user_id, post_id = %post.id, "Auto-publish off, leaving posts generated");
            return Ok(TaskOutcome::Completed);
        }

        self.schedule(user_id, generated, settings).await
    }

    async fn schedule(
        &self,
        user_id: &str,
        generated: Vec<GeneratedPost>,
        settings: &UserSettings,
    ) -> Result<TaskOutcome, PipelineError> {
        let limit = settings.max_posts_per_day;
        let remaining = match self.ctx.quota.remaining(user_id, limit).await {
            Ok(remaining) => remaining,
            Err(e) => {
                warn!(user_id, error = %e, "Quota lookup failed, the publish stage will recheck");
                None
            }
        };

        if remaining == Some(0) {
            metrics::record_quota_skip();
            self.ctx
                .activity
                .record(
                    ActivityRecord::new(
                        ActivityKind::PublishingSkipped,
                        Some(user_id),
                        "Daily publish limit reached, generated posts not queued",
                    )
                    .with_details(json!({
                        "reason": "publishing_skipped_limit",
                        "daily_limit": limit,
                    })),
                )
                .await;
            return Ok(TaskOutcome::skipped("daily publish limit reached"));
        }

        let now = Utc::now();
        let spread = SpreadScheduler::from_settings(settings)
            .with_daily_limit(remaining.unwrap_or(limit));
        let platforms: Vec<Platform> = generated.iter().map(|g| g.platform).collect();
        let slots = spread.assign(&platforms, now);

        let total = generated.len();
        let mut immediate = 0;
        let mut delayed = 0;
        for (mut post, due_at) in generated.into_iter().zip(slots) {
            post.scheduled_time = Some(due_at);

            if due_at <= now {
                if self.enqueue_now(user_id, post).await {
                    immediate += 1;
                }
                continue;
            }

            let task = Task::publish_scheduled(post.clone(), due_at);
            match self.ctx.delayed.schedule(&task, due_at).await {
                Ok(()) => {
                    delayed += 1;
                    if let Some(record_id) = post.record_id() {
                        self.ctx
                            .posts
                            .advance(
                                record_id,
                                PostStatus::Generated,
                                PostStatus::Scheduled,
                                json!({ "scheduled_time": due_at }),
                            )
                            .await;
                    }
                    self.ctx
                        .activity
                        .record(
                            ActivityRecord::new(
                                ActivityKind::PostScheduled,
                                Some(user_id),
                                format!("Scheduled {} post for {due_at}", post.platform),
                            )
                            .with_details(json!({ "platform": post.platform, "scheduled_time": due_at })),
                        )
                        .await;
                }
                Err(e) => {
                    warn!(user_id, platform = %post.platform, error = %e, "Delayed index unavailable, publishing now");
                    if self.enqueue_now(user_id, post).await {
                        immediate += 1;
                    }
                }
            }
        }

        let lost = total - immediate - delayed;
        info!(user_id, immediate, delayed, lost, "Generated posts queued for publishing");
        if lost > 0 {
            self.ctx
                .activity
                .record(
                    ActivityRecord::new(
                        ActivityKind::PublishingError,
                        Some(user_id),
                        format!("{lost} of {total} generated posts could not be queued"),
                    )
                    .with_details(json!({ "queued": immediate + delayed, "lost": lost })),
                )
                .await;
            return Ok(TaskOutcome::failed(format!(
                "{lost} of {total} generated posts could not be queued"
            )));
        }
        Ok(TaskOutcome::Completed)
    }

    /// Push onto the publish queue; a failure is logged and reported as false
    async fn enqueue_now(&self, user_id: &str, post: GeneratedPost) -> bool {
        let platform = post.platform;
        match self.ctx.queue.enqueue(&Task::publish_immediate(post)).await {
            Ok(_) => true,
            Err(e) => {
                warn!(user_id, platform = %platform, error = %e, "Failed to queue generated post");
                false
            }
        }
    }

    async fn fail(&self, user_id: &str, post: &Post, reason: &str) -> TaskOutcome {
        warn!(user_id, post_id = %post.id, reason, "Content generation failed");
        self.ctx
            .posts
            .advance(
                &post.id,
                PostStatus::Generating,
                PostStatus::GenerationFailed,
                json!({ "error": reason }),
            )
            .await;
        self.ctx
            .activity
            .record(
                ActivityRecord::new(
                    ActivityKind::ContentGenerationFailed,
                    Some(user_id),
                    format!("Generation failed for {}", post.title),
                )
                .with_details(json!({ "post_id": post.id, "error": reason })),
            )
            .await;
        TaskOutcome::failed(reason)
    }
}

#[async_trait]
impl TaskHandler for GenerationHandler {
    fn queue(&self) -> QueueName {
        QueueName::Generation
    }

    async fn handle(&self, task: Task) -> Result<TaskOutcome, PipelineError> {
        match &task.payload {
            TaskPayload::Generation {
                user_id,
                post,
                settings,
            } => self.generate(user_id, post, settings).await,
            _ => Err(PipelineError::invalid(task.kind(), "not a generation task")),
        }
    }
}
