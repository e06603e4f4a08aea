//! Pending-work priority resolution
//!
//! Before a new discovery scan for a user, outstanding work wins:
//!
//! 1. posts still `discovered` are re-enqueued for generation (carrying the
//!    current settings) and marked `processing`; the scan is skipped
//! 2. otherwise, a post already `processing` or `generating` also skips it
//! 3. only with neither does the scan go ahead
//!
//! A failing lookup assumes no pending work so a user is never starved.

use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::posts::PostTracker;
use super::settings::SettingsProvider;
use crate::collaborators::SystemOfRecord;
use crate::models::PostStatus;
use crate::queue::{Task, TaskQueue};

pub const DEFAULT_DRAIN_LIMIT: usize = 50;

/// Outcome of [`PendingWorkResolver::resolve`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resolution {
    pub drained_count: usize,
    pub should_skip_new_scan: bool,
}

impl Resolution {
    fn scan() -> Self {
        Self::default()
    }

    fn skip(drained_count: usize) -> Self {
        Self {
            drained_count,
            should_skip_new_scan: true,
        }
    }
}

#[derive(Clone)]
pub struct PendingWorkResolver {
    records: Arc<dyn SystemOfRecord>,
    queue: TaskQueue,
    settings: SettingsProvider,
    posts: PostTracker,
    drain_limit: usize,
}

impl PendingWorkResolver {
    pub fn new(
        records: Arc<dyn SystemOfRecord>,
        queue: TaskQueue,
        settings: SettingsProvider,
        posts: PostTracker,
    ) -> Self {
        Self {
            records,
            queue,
            settings,
            posts,
            drain_limit: DEFAULT_DRAIN_LIMIT,
        }
    }

    pub fn with_drain_limit(mut self, limit: usize) -> Self {
        self.drain_limit = limit.max(1);
        self
    }

    pub async fn resolve(&self, user_id: &str) -> Resolution {
        let settings = self.settings.get(user_id).await;

        // Discovered posts of a user with generation off stay parked
        if settings.content_generation_enabled {
            let pending = match self
                .records
                .posts_with_status(user_id, PostStatus::Discovered, self.drain_limit)
                .await
            {
                Ok(posts) => posts,
                Err(e) => {
                    warn!(user_id, error = %e, "Pending post lookup failed, allowing scan");
                    return Resolution::scan();
                }
            };

            let mut drained = 0;
            for mut post in pending {
                let post_id = post.id.clone();
                post.status = PostStatus::Processing;
                match self
                    .queue
                    .enqueue(&Task::generation(post, settings.clone()))
                    .await
                {
                    Ok(_) => {
                        self.posts
                            .advance(
                                &post_id,
                                PostStatus::Discovered,
                                PostStatus::Processing,
                                json!({ "reason": "pending_drain" }),
                            )
                            .await;
                        drained += 1;
                    }
                    Err(e) => {
                        warn!(user_id, post_id = %post_id, error = %e, "Failed to re-enqueue pending post");
                    }
                }
            }

            if drained > 0 {
                info!(user_id, drained, "Drained pending posts, skipping new scan");
                return Resolution::skip(drained);
            }
        }

        for status in [PostStatus::Processing, PostStatus::Generating] {
            match self.records.posts_with_status(user_id, status, 1).await {
                Ok(posts) if !posts.is_empty() => {
                    info!(user_id, status = %status, "Generation in flight, skipping new scan");
                    return Resolution::skip(0);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(user_id, error = %e, "In-flight lookup failed, allowing scan");
                    return Resolution::scan();
                }
            }
        }

        Resolution::scan()
    }
}
