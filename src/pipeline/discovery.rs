//! Discovery stage
//!
//! Scans monitors and turns new content into generation tasks. The dedup
//! gate runs per item: a fingerprint already recorded for the monitor is
//! skipped, a new one is enqueued for generation first and recorded after,
//! so a crash in between can only cause a duplicate, never a loss.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::priority::PendingWorkResolver;
use super::{PipelineContext, PipelineError, TaskHandler, TaskOutcome};
use crate::models::{ActivityKind, ActivityRecord, DiscoveredContent, Monitor, PostStatus, UserSettings};
use crate::queue::{QueueName, Task, TaskPayload};

/// Result of scanning one monitor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub found: usize,
    pub enqueued: usize,
    pub duplicates: usize,
}

impl ScanSummary {
    fn merge(&mut self, other: ScanSummary) {
        self.found += other.found;
        self.enqueued += other.enqueued;
        self.duplicates += other.duplicates;
    }
}

pub struct DiscoveryHandler {
    ctx: PipelineContext,
    resolver: PendingWorkResolver,
}

impl DiscoveryHandler {
    pub fn new(ctx: PipelineContext) -> Self {
        let resolver = ctx.resolver();
        Self { ctx, resolver }
    }

    /// Operator scan: bypasses priority resolution
    async fn manual(
        &self,
        user_id: &str,
        monitor_id: Option<&str>,
    ) -> Result<TaskOutcome, PipelineError> {
        let Some(monitor_id) = monitor_id else {
            let summary = self.scan_user(user_id).await?;
            return Ok(self.finish(user_id, summary));
        };

        let monitor = self
            .ctx
            .collaborators
            .records
            .get_monitor(monitor_id)
            .await?
            .ok_or_else(|| {
                PipelineError::invalid("discovery_manual", format!("unknown monitor {monitor_id}"))
            })?;
        if monitor.user_id != user_id {
            return Err(PipelineError::invalid(
                "discovery_manual",
                format!("monitor {monitor_id} does not belong to user {user_id}"),
            ));
        }
        if !monitor.active {
            return Ok(TaskOutcome::skipped(format!("monitor {monitor_id} is inactive")));
        }

        let settings = self.ctx.settings.get(user_id).await;
        let items = self
            .ctx
            .collaborators
            .discovery
            .scan_monitor(&monitor)
            .await?;
        let summary = self.process_monitor(&monitor, items, &settings).await;
        Ok(self.finish(user_id, summary))
    }

    /// All-users sweep: resolve pending work, then fan out per-user scans
    async fn sweep(&self, initial_run: bool) -> Result<TaskOutcome, PipelineError> {
        let users = self
            .ctx
            .collaborators
            .records
            .users_with_active_monitors()
            .await?;

        let mut enqueued = 0;
        let mut deferred = 0;
        for user_id in &users {
            if self.resolver.resolve(user_id).await.should_skip_new_scan {
                deferred += 1;
                continue;
            }
            match self
                .ctx
                .queue
                .enqueue(&Task::discovery_for_user(user_id.clone(), true))
                .await
            {
                Ok(_) => enqueued += 1,
                Err(e) => warn!(user_id = %user_id, error = %e, "Failed to enqueue user scan"),
            }
        }

        info!(
            initial_run,
            users = users.len(),
            enqueued,
            deferred,
            "Discovery sweep finished"
        );
        Ok(TaskOutcome::Completed)
    }

    async fn for_user(
        &self,
        user_id: &str,
        pending_work_checked: bool,
    ) -> Result<TaskOutcome, PipelineError> {
        if !pending_work_checked {
            let resolution = self.resolver.resolve(user_id).await;
            if resolution.should_skip_new_scan {
                self.ctx
                    .activity
                    .record(
                        ActivityRecord::new(
                            ActivityKind::DiscoverySkipped,
                            Some(user_id),
                            "Pending work takes priority over a new scan",
                        )
                        .with_details(json!({ "drained": resolution.drained_count })),
                    )
                    .await;
                return Ok(TaskOutcome::skipped("pending work"));
            }
        }

        let summary = self.scan_user(user_id).await?;
        Ok(self.finish(user_id, summary))
    }

    /// Scan every active monitor of a user in one collaborator call
    async fn scan_user(&self, user_id: &str) -> Result<ScanSummary, PipelineError> {
        let records = &self.ctx.collaborators.records;
        let monitors = records.active_monitors(user_id).await?;
        if monitors.is_empty() {
            debug!(user_id, "No active monitors");
            return Ok(ScanSummary::default());
        }

        let settings = self.ctx.settings.get(user_id).await;
        let mut results: HashMap<String, Vec<DiscoveredContent>> = self
            .ctx
            .collaborators
            .discovery
            .scan_all_monitors(user_id)
            .await?;

        let mut total = ScanSummary::default();
        for monitor in &monitors {
            let items = results.remove(&monitor.id).unwrap_or_default();
            total.merge(self.process_monitor(monitor, items, &settings).await);
        }
        for monitor_id in results.keys() {
            warn!(user_id, monitor_id = %monitor_id, "Scan returned content for an unknown monitor");
        }
        Ok(total)
    }

    async fn process_monitor(
        &self,
        monitor: &Monitor,
        items: Vec<DiscoveredContent>,
        settings: &UserSettings,
    ) -> ScanSummary {
        let mut summary = ScanSummary {
            found: items.len(),
            ..Default::default()
        };

        for content in &items {
            match self.gate(monitor, content, settings).await {
                Ok(true) => summary.enqueued += 1,
                Ok(false) => summary.duplicates += 1,
                Err(e) => {
                    warn!(monitor_id = %monitor.id, url = %content.url, error = %e, "Failed to queue discovered content");
                }
            }
        }

        if let Err(e) = self
            .ctx
            .collaborators
            .records
            .mark_monitor_checked(&monitor.id, Utc::now())
            .await
        {
            warn!(monitor_id = %monitor.id, error = %e, "Failed to mark monitor checked");
        }
        self.ctx.stats.add_monitors_checked(1);
        self.ctx
            .activity
            .record(
                ActivityRecord::new(
                    ActivityKind::MonitorChecked,
                    Some(&monitor.user_id),
                    format!("Checked {}", monitor.url),
                )
                .with_details(json!({
                    "monitor_id": monitor.id,
                    "found": summary.found,
                    "new": summary.enqueued,
                })),
            )
            .await;

        summary
    }

    /// Dedup gate for one item; `Ok(true)` when it was enqueued
    async fn gate(
        &self,
        monitor: &Monitor,
        content: &DiscoveredContent,
        settings: &UserSettings,
    ) -> Result<bool, PipelineError> {
        let fingerprint = content.fingerprint();
        if self.ctx.dedup.seen(&monitor.id, &fingerprint).await? {
            debug!(monitor_id = %monitor.id, fingerprint = %fingerprint, "Already processed");
            return Ok(false);
        }

        let mut post = content.to_post(monitor);
        if settings.content_generation_enabled {
            post.status = PostStatus::Processing;
            self.ctx
                .queue
                .enqueue(&Task::generation(post.clone(), settings.clone()))
                .await?;
        }

        // Recorded only once the generation task is durably queued
        if let Err(e) = self.ctx.dedup.record(&monitor.id, &fingerprint).await {
            warn!(monitor_id = %monitor.id, error = %e, "Failed to record fingerprint, content may be regenerated");
        }

        if settings.content_generation_enabled && content.post_id.is_some() {
            self.ctx
                .posts
                .advance(
                    &post.id,
                    PostStatus::Discovered,
                    PostStatus::Processing,
                    json!({ "queued_at": Utc::now() }),
                )
                .await;
        }

        self.ctx.stats.add_discovered(1);
        self.ctx
            .activity
            .record(
                ActivityRecord::new(
                    ActivityKind::ContentDiscovered,
                    Some(&monitor.user_id),
                    format!("Discovered: {}", crate::utils::truncate_text(&content.title, 80)),
                )
                .with_details(json!({ "post_id": post.id, "url": content.url })),
            )
            .await;
        Ok(true)
    }

    fn finish(&self, user_id: &str, summary: ScanSummary) -> TaskOutcome {
        info!(
            user_id,
            found = summary.found,
            enqueued = summary.enqueued,
            duplicates = summary.duplicates,
            "Discovery scan finished"
        );
        TaskOutcome::Completed
    }
}

#[async_trait]
impl TaskHandler for DiscoveryHandler {
    fn queue(&self) -> QueueName {
        QueueName::Discovery
    }

    async fn handle(&self, task: Task) -> Result<TaskOutcome, PipelineError> {
        match &task.payload {
            TaskPayload::DiscoveryManual {
                user_id,
                monitor_id,
            } => self.manual(user_id, monitor_id.as_deref()).await,
            TaskPayload::DiscoveryScheduled { initial_run } => self.sweep(*initial_run).await,
            TaskPayload::DiscoveryForUser {
                user_id,
                pending_work_checked,
            } => self.for_user(user_id, *pending_work_checked).await,
            _ => Err(PipelineError::invalid(
                task.kind(),
                "not a discovery task",
            )),
        }
    }
}
