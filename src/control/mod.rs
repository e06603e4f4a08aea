//! Control surface
//!
//! The operator's way in: trigger discovery, send control signals to the
//! worker, and read its liveness and queue depths. Everything goes through
//! the coordination store, so the control plane can run in a different
//! process from the worker.
//!
//! - [`ControlPlane`] - the operations themselves
//! - [`api`] - axum routes over a `ControlPlane`
//! - [`server`] - HTTP server with CORS, request tracing and graceful shutdown

pub mod api;
pub mod server;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::models::ActivityRecord;
use crate::pipeline::ActivityLog;
use crate::queue::{QueueError, QueueName, Task, TaskQueue};
use crate::scheduler::DelayedPublishScheduler;
use crate::store::{CoordinationStore, KeySpace, ResilientStore, StoreError, StoreRetryPolicy};
use crate::worker::{ControlAction, ControlChannel, ControlSignal};

pub use server::{ControlServer, ServerError};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// What a manual discovery run covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryTarget {
    Monitor { user_id: String, monitor_id: String },
    User { user_id: String },
    AllUsers,
}

impl DiscoveryTarget {
    /// Monitor needs its owner; nothing at all means every user
    pub fn from_parts(
        user_id: Option<String>,
        monitor_id: Option<String>,
    ) -> Result<Self, ControlError> {
        let user_id = user_id.filter(|u| !u.trim().is_empty());
        let monitor_id = monitor_id.filter(|m| !m.trim().is_empty());
        match (user_id, monitor_id) {
            (Some(user_id), Some(monitor_id)) => Ok(Self::Monitor { user_id, monitor_id }),
            (Some(user_id), None) => Ok(Self::User { user_id }),
            (None, None) => Ok(Self::AllUsers),
            (None, Some(_)) => Err(ControlError::InvalidRequest(
                "monitor_id requires user_id".to_string(),
            )),
        }
    }

    fn into_task(self) -> Task {
        match self {
            Self::Monitor { user_id, monitor_id } => Task::discovery_manual(user_id, Some(monitor_id)),
            Self::User { user_id } => Task::discovery_manual(user_id, None),
            Self::AllUsers => Task::discovery_scheduled(false),
        }
    }
}

/// Snapshot of worker liveness and backlog
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub alive: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub queues: BTreeMap<String, usize>,
    pub delayed: usize,
    pub stats: HashMap<String, String>,
}

#[derive(Clone)]
pub struct ControlPlane {
    store: ResilientStore,
    keys: KeySpace,
    queue: TaskQueue,
    delayed: DelayedPublishScheduler,
    channel: ControlChannel,
    activity: ActivityLog,
}

impl ControlPlane {
    pub fn new(store: ResilientStore, keys: KeySpace) -> Self {
        Self {
            queue: TaskQueue::new(store.clone(), keys.clone()),
            delayed: DelayedPublishScheduler::new(store.clone(), keys.clone()),
            channel: ControlChannel::new(store.clone(), keys.clone()),
            activity: ActivityLog::new(store.clone(), keys.clone()),
            store,
            keys,
        }
    }

    pub fn from_config(config: &Config, backend: Arc<dyn CoordinationStore>) -> Self {
        let (ordinary, _) = StoreRetryPolicy::from_config(&config.retry);
        let mut plane = Self::new(
            ResilientStore::new(backend, ordinary),
            KeySpace::new(config.store.key_prefix.clone()),
        );
        plane.channel = plane
            .channel
            .with_ttl(std::time::Duration::from_secs(config.worker.control_ttl_secs));
        plane
    }

    /// Enqueue a manual discovery run; returns the queued task
    pub async fn enqueue_discovery(&self, target: DiscoveryTarget) -> Result<Task, ControlError> {
        let task = target.into_task();
        self.queue.enqueue(&task).await?;
        info!(task_id = %task.id, user_id = ?task.user_id(), "Discovery enqueued");
        Ok(task)
    }

    pub async fn send_signal(&self, action: ControlAction) -> Result<ControlSignal, ControlError> {
        let signal = self.channel.send(action).await?;
        info!(action = %action, "Control signal written");
        Ok(signal)
    }

    pub async fn status(&self) -> Result<WorkerStatus, ControlError> {
        let last_heartbeat = self
            .store
            .get(&self.keys.heartbeat())
            .await?
            .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            .map(|at| at.with_timezone(&Utc));

        let mut queues = BTreeMap::new();
        for queue in QueueName::all() {
            queues.insert(queue.list_name().to_string(), self.queue.depth(queue).await?);
        }

        Ok(WorkerStatus {
            alive: last_heartbeat.is_some(),
            last_heartbeat,
            queues,
            delayed: self.delayed.pending().await?,
            stats: self.store.hash_get_all(&self.keys.stats()).await?,
        })
    }

    /// Newest activity entries first
    pub async fn activities(&self, limit: usize) -> Result<Vec<ActivityRecord>, ControlError> {
        Ok(self.activity.recent(limit).await?)
    }
}
