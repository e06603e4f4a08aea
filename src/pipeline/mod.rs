//! Stage handlers for the discovery, generation and publish queues
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Discovery  │     │ Generation  │     │   Publish   │
//! │   Handler   │────▶│   Handler   │────▶│   Handler   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!   dedup gate          spread + quota      eligibility + quota
//!   priority resolver   delayed index       idempotent publish
//! ```
//!
//! Handlers share one [`PipelineContext`]. They never hold pipeline state in
//! process; everything that coordinates workers lives in the store. Errors
//! stay inside the task: a handler returns a [`TaskOutcome`] for expected
//! results and a [`PipelineError`] only when the task could not be handled.

pub mod activity;
pub mod discovery;
pub mod generation;
pub mod posts;
pub mod priority;
pub mod publish;
pub mod settings;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::collaborators::{CollaboratorError, Collaborators};
use crate::config::Config;
use crate::dedup::DedupCache;
use crate::queue::{QueueError, QueueName, Task, TaskError, TaskQueue};
use crate::quota::QuotaLedger;
use crate::scheduler::{DelayedPublishScheduler, SchedulerError};
use crate::store::{KeySpace, ResilientStore, StoreError};

pub use activity::ActivityLog;
pub use discovery::DiscoveryHandler;
pub use generation::GenerationHandler;
pub use posts::PostTracker;
pub use priority::{PendingWorkResolver, Resolution};
pub use publish::PublishHandler;
pub use settings::SettingsProvider;
pub use stats::{PipelineStats, StatsSnapshot};

// ============================================================================
// Outcomes and errors
// ============================================================================

/// Expected result of handling one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Not eligible now (quota, disabled platform, pending work); not an error
    Skipped(String),
    /// A collaborator failed and the post was moved to a failure state
    Failed(String),
}

impl TaskOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

/// A task that could not be handled
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Invalid {kind} task: {reason}")]
    InvalidTask { kind: &'static str, reason: String },

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    pub fn invalid(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidTask {
            kind,
            reason: reason.into(),
        }
    }

    /// Retrying the same payload cannot succeed
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTask { .. } | Self::Task(_) | Self::Queue(QueueError::Task(_))
        )
    }
}

/// One queue's task handler
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn queue(&self) -> QueueName;

    async fn handle(&self, task: Task) -> Result<TaskOutcome, PipelineError>;
}

// ============================================================================
// Shared context
// ============================================================================

/// Stage behavior knobs
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub pending_drain_limit: usize,
    pub defer_over_quota: bool,
    pub settings_cache_ttl: Duration,
    pub activity_log_len: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pending_drain_limit: config.pipeline.pending_drain_limit,
            defer_over_quota: config.pipeline.defer_over_quota,
            settings_cache_ttl: Duration::from_secs(config.pipeline.settings_cache_secs),
            activity_log_len: config.pipeline.activity_log_len,
        }
    }
}

/// Everything the stage handlers share
#[derive(Clone)]
pub struct PipelineContext {
    pub collaborators: Collaborators,
    pub queue: TaskQueue,
    pub dedup: DedupCache,
    pub quota: QuotaLedger,
    pub delayed: DelayedPublishScheduler,
    pub settings: SettingsProvider,
    pub activity: ActivityLog,
    pub posts: PostTracker,
    pub stats: Arc<PipelineStats>,
    pub options: PipelineOptions,
}

impl PipelineContext {
    pub fn new(
        store: ResilientStore,
        keys: KeySpace,
        collaborators: Collaborators,
        options: PipelineOptions,
    ) -> Self {
        Self {
            queue: TaskQueue::new(store.clone(), keys.clone()),
            dedup: DedupCache::new(store.clone(), keys.clone()),
            quota: QuotaLedger::new(store.clone(), keys.clone()),
            delayed: DelayedPublishScheduler::new(store.clone(), keys.clone()),
            settings: SettingsProvider::new(
                collaborators.records.clone(),
                store.clone(),
                keys.clone(),
            )
            .with_cache_ttl(options.settings_cache_ttl),
            activity: ActivityLog::new(store, keys).with_max_len(options.activity_log_len),
            posts: PostTracker::new(collaborators.records.clone()),
            stats: PipelineStats::new(),
            collaborators,
            options,
        }
    }

    /// Apply TTL settings from the loaded configuration
    pub fn with_config(mut self, config: &Config) -> Self {
        self.dedup = self.dedup.with_ttl(config.dedup_ttl());
        self.quota = self.quota.with_ttl(config.quota_ttl());
        self
    }

    pub fn resolver(&self) -> PendingWorkResolver {
        PendingWorkResolver::new(
            self.collaborators.records.clone(),
            self.queue.clone(),
            self.settings.clone(),
            self.posts.clone(),
        )
        .with_drain_limit(self.options.pending_drain_limit)
    }

    /// The three stage handlers, in queue order
    pub fn handlers(&self) -> Vec<Arc<dyn TaskHandler>> {
        vec![
            Arc::new(DiscoveryHandler::new(self.clone())),
            Arc::new(GenerationHandler::new(self.clone())),
            Arc::new(PublishHandler::new(self.clone())),
        ]
    }
}
