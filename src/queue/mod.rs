//! Pipeline stage queues and the tasks placed on them
//!
//! Every unit of work is a [`Task`]: a closed tagged union with one variant
//! per kind, serialized as JSON onto one of three FIFO lists.
//!
//! ```text
//!  discovery-manual ─┐
//!  discovery-scheduled ─┼─→ [discovery queue] ─→ [generation queue] ─→ [publish queue]
//!  discovery-for-user ─┘        generation            publish-immediate
//!                                                     publish-scheduled (via delayed index)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{GeneratedPost, Post, UserSettings};
use crate::store::{KeySpace, ResilientStore, StoreError, StoreRetryPolicy};

/// Errors for malformed tasks; never retried
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Malformed task payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid task {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },

    #[error("Task {kind} does not belong on the {queue} queue")]
    WrongQueue { kind: &'static str, queue: QueueName },
}

impl TaskError {
    fn invalid(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            kind,
            reason: reason.into(),
        }
    }
}

/// One of the three pipeline stage queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Discovery,
    Generation,
    Publish,
}

impl QueueName {
    pub fn all() -> [Self; 3] {
        [Self::Discovery, Self::Generation, Self::Publish]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Generation => "generation",
            Self::Publish => "publish",
        }
    }

    /// List name in the coordination store
    pub fn list_name(&self) -> &'static str {
        match self {
            Self::Discovery => "blog_monitoring_queue",
            Self::Generation => "content_processing_queue",
            Self::Publish => "publishing_queue",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind-specific task payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Operator-triggered scan of one monitor, or of all of a user's monitors
    DiscoveryManual {
        user_id: String,
        #[serde(default)]
        monitor_id: Option<String>,
    },
    /// Sweep over every user with active monitors
    DiscoveryScheduled {
        #[serde(default)]
        initial_run: bool,
    },
    /// Recurring scan for one user
    DiscoveryForUser {
        user_id: String,
        /// Priority resolution already ran in the parent task
        #[serde(default)]
        pending_work_checked: bool,
    },
    Generation {
        user_id: String,
        post: Post,
        settings: UserSettings,
    },
    PublishImmediate {
        post: GeneratedPost,
    },
    PublishScheduled {
        post: GeneratedPost,
        due_at: DateTime<Utc>,
    },
}

/// Envelope placed on a queue; immutable once enqueued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: TaskPayload,
}

impl Task {
    pub fn new(payload: TaskPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            payload,
        }
    }

    pub fn discovery_manual(user_id: impl Into<String>, monitor_id: Option<String>) -> Self {
        Self::new(TaskPayload::DiscoveryManual {
            user_id: user_id.into(),
            monitor_id,
        })
    }

    pub fn discovery_scheduled(initial_run: bool) -> Self {
        Self::new(TaskPayload::DiscoveryScheduled { initial_run })
    }

    pub fn discovery_for_user(user_id: impl Into<String>, pending_work_checked: bool) -> Self {
        Self::new(TaskPayload::DiscoveryForUser {
            user_id: user_id.into(),
            pending_work_checked,
        })
    }

    pub fn generation(post: Post, settings: UserSettings) -> Self {
        Self::new(TaskPayload::Generation {
            user_id: post.user_id.clone(),
            post,
            settings,
        })
    }

    pub fn publish_immediate(post: GeneratedPost) -> Self {
        Self::new(TaskPayload::PublishImmediate { post })
    }

    pub fn publish_scheduled(post: GeneratedPost, due_at: DateTime<Utc>) -> Self {
        Self::new(TaskPayload::PublishScheduled { post, due_at })
    }

    pub fn kind(&self) -> &'static str {
        match &self.payload {
            TaskPayload::DiscoveryManual { .. } => "discovery_manual",
            TaskPayload::DiscoveryScheduled { .. } => "discovery_scheduled",
            TaskPayload::DiscoveryForUser { .. } => "discovery_for_user",
            TaskPayload::Generation { .. } => "generation",
            TaskPayload::PublishImmediate { .. } => "publish_immediate",
            TaskPayload::PublishScheduled { .. } => "publish_scheduled",
        }
    }

    /// Owning user; `None` means the task applies to all users
    pub fn user_id(&self) -> Option<&str> {
        match &self.payload {
            TaskPayload::DiscoveryManual { user_id, .. }
            | TaskPayload::DiscoveryForUser { user_id, .. }
            | TaskPayload::Generation { user_id, .. } => Some(user_id),
            TaskPayload::DiscoveryScheduled { .. } => None,
            TaskPayload::PublishImmediate { post } | TaskPayload::PublishScheduled { post, .. } => {
                Some(&post.user_id)
            }
        }
    }

    /// Queue this task belongs on
    pub fn queue(&self) -> QueueName {
        match &self.payload {
            TaskPayload::DiscoveryManual { .. }
            | TaskPayload::DiscoveryScheduled { .. }
            | TaskPayload::DiscoveryForUser { .. } => QueueName::Discovery,
            TaskPayload::Generation { .. } => QueueName::Generation,
            TaskPayload::PublishImmediate { .. } | TaskPayload::PublishScheduled { .. } => {
                QueueName::Publish
            }
        }
    }

    /// Check required fields
    pub fn validate(&self) -> Result<(), TaskError> {
        let kind = self.kind();
        let required = |value: &str, field: &str| {
            if value.trim().is_empty() {
                Err(TaskError::invalid(kind, format!("missing {field}")))
            } else {
                Ok(())
            }
        };

        match &self.payload {
            TaskPayload::DiscoveryManual {
                user_id,
                monitor_id,
            } => {
                required(user_id, "user_id")?;
                if let Some(monitor_id) = monitor_id {
                    required(monitor_id, "monitor_id")?;
                }
            }
            TaskPayload::DiscoveryScheduled { .. } => {}
            TaskPayload::DiscoveryForUser { user_id, .. } => required(user_id, "user_id")?,
            TaskPayload::Generation { user_id, post, .. } => {
                required(user_id, "user_id")?;
                required(&post.id, "post.id")?;
                if post.user_id != *user_id {
                    return Err(TaskError::invalid(kind, "post belongs to another user"));
                }
            }
            TaskPayload::PublishImmediate { post } | TaskPayload::PublishScheduled { post, .. } => {
                required(&post.user_id, "post.user_id")?;
                required(&post.content, "post.content")?;
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<String, TaskError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate a raw queue entry
    pub fn decode(raw: &str) -> Result<Self, TaskError> {
        let task: Task = serde_json::from_str(raw)?;
        task.validate()?;
        Ok(task)
    }

    /// Decode an entry popped from `queue`, rejecting tasks from other stages
    pub fn decode_for(raw: &str, queue: QueueName) -> Result<Self, TaskError> {
        let task = Self::decode(raw)?;
        if task.queue() != queue {
            return Err(TaskError::WrongQueue {
                kind: task.kind(),
                queue,
            });
        }
        Ok(task)
    }
}

/// Errors raised while enqueueing
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// The three stage queues over the coordination store
#[derive(Clone)]
pub struct TaskQueue {
    store: ResilientStore,
    keys: KeySpace,
}

impl TaskQueue {
    pub fn new(store: ResilientStore, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Validate, serialize and append a task to its stage queue
    pub async fn enqueue(&self, task: &Task) -> Result<QueueName, QueueError> {
        task.validate()?;
        let queue = task.queue();
        let raw = task.encode()?;
        self.store.push(&self.keys.queue(queue), &raw).await?;

        tracing::debug!(
            task_id = %task.id,
            kind = task.kind(),
            queue = %queue,
            "Task enqueued"
        );
        Ok(queue)
    }

    /// Blocking pop of one raw entry under the given retry policy
    ///
    /// `Ok(None)` is an empty poll; errors mean the store could not be asked.
    pub async fn pop_raw(
        &self,
        queue: QueueName,
        timeout: Duration,
        policy: StoreRetryPolicy,
    ) -> Result<Option<String>, StoreError> {
        self.store
            .with_policy(policy)
            .blocking_pop(&self.keys.queue(queue), timeout)
            .await
    }

    /// Return a popped entry to the front of its queue, ahead of newer tasks
    pub async fn push_back_raw(&self, queue: QueueName, raw: &str) -> Result<(), StoreError> {
        self.store.push_oldest(&self.keys.queue(queue), raw).await
    }

    pub async fn depth(&self, queue: QueueName) -> Result<usize, StoreError> {
        self.store.list_len(&self.keys.queue(queue)).await
    }

    /// Trim a queue that grew past `threshold` down to its newest `keep` entries
    ///
    /// Returns the number of entries dropped.
    pub async fn trim_oversized(
        &self,
        queue: QueueName,
        threshold: usize,
        keep: usize,
    ) -> Result<usize, StoreError> {
        let key = self.keys.queue(queue);
        let depth = self.store.list_len(&key).await?;
        if depth <= threshold {
            return Ok(0);
        }
        self.store.list_trim(&key, keep).await?;
        let dropped = depth.saturating_sub(keep);
        tracing::warn!(queue = %queue, depth, keep, dropped, "Trimmed oversized queue");
        Ok(dropped)
    }
}
