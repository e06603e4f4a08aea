//! Delayed publish index
//!
//! Publish tasks with a future due time wait in a sorted set scored by
//! their due time (unix seconds). [`DelayedPublishScheduler::promote_due`]
//! moves every entry whose score is <= now onto the publish queue, oldest
//! first. Each move is an atomic remove-and-push, so concurrent or repeated
//! promotion never pushes an entry twice.
//!
//! Promotion runs once per publish-consumer iteration; latency is bounded by
//! that poll interval.

use chrono::{DateTime, Utc};

use super::error::{SchedulerError, SchedulerResult};
use crate::metrics;
use crate::queue::{QueueName, Task, TaskPayload};
use crate::store::{KeySpace, ResilientStore, StoreResult};

fn score(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

/// Time-indexed queue feeding the publish queue
#[derive(Clone)]
pub struct DelayedPublishScheduler {
    store: ResilientStore,
    keys: KeySpace,
}

impl DelayedPublishScheduler {
    pub fn new(store: ResilientStore, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Index a publish task under `due_at`
    pub async fn schedule(&self, task: &Task, due_at: DateTime<Utc>) -> SchedulerResult<()> {
        if !matches!(
            task.payload,
            TaskPayload::PublishImmediate { .. } | TaskPayload::PublishScheduled { .. }
        ) {
            return Err(SchedulerError::not_publish_task(task.kind()));
        }

        let member = serde_json::to_string(task)?;
        self.store
            .sorted_add(&self.keys.delayed(), &member, score(due_at))
            .await?;

        tracing::debug!(task_id = %task.id, due_at = %due_at, "Publish task delayed");
        Ok(())
    }

    /// Move every entry due at or before `now` onto the publish queue
    ///
    /// Returns how many entries this call moved.
    pub async fn promote_due(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let delayed = self.keys.delayed();
        let publish = self.keys.queue(QueueName::Publish);

        let due = self.store.sorted_range_by_score(&delayed, score(now)).await?;
        let mut promoted = 0;
        for (member, due_score) in due {
            if self.store.promote_member(&delayed, &member, &publish).await? {
                promoted += 1;
                tracing::debug!(due_score, "Promoted delayed publish task");
            }
        }

        if promoted > 0 {
            metrics::record_promotions(promoted);
            tracing::info!(promoted, "Promoted due publish tasks");
        }
        Ok(promoted)
    }

    /// Entries still waiting
    pub async fn pending(&self) -> StoreResult<usize> {
        self.store.sorted_len(&self.keys.delayed()).await
    }
}
